//! OpenTelemetry instrumentation middleware for inbound HTTP requests.
//!
//! The host framework calls [`Middleware::on_request`] once the route has
//! been matched and [`Middleware::on_response`] once the handler has
//! produced a status. `on_request` extracts the remote parent from the
//! request headers, opens a `SERVER` span and returns a [`RequestGuard`];
//! the guard owns the span and ends it on drop, so a handler that panics or
//! bails early still closes the span.
//!
//! ```
//! use otel_instrument_web::Middleware;
//!
//! let middleware = Middleware::builder().build();
//! let request = http::Request::get("/users/42").body(()).unwrap();
//!
//! let guard = middleware.on_request(&request, "/users/:id");
//! // ... run the handler under guard.context() ...
//! middleware.on_response(guard, http::StatusCode::OK, None);
//! ```

mod middleware;

pub use middleware::{
    Middleware, MiddlewareBuilder, RequestContext, RequestGuard, SpanNameFormatter,
};
