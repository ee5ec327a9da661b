use std::sync::Arc;

use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, KeyValue};
use opentelemetry_http::HeaderExtractor;
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, HTTP_ROUTE, NETWORK_TRANSPORT,
    SERVER_ADDRESS, URL_PATH, URL_SCHEME, USER_AGENT_ORIGINAL,
};
use otel_instrument::{http_status, InstrumentationBuilder, StartTime};

const INSTRUMENTATION_NAME: &str = "otel-instrument-web";
const DEFAULT_OPERATION_NAME: &str = "http-server";

const METRIC_SERVER_DURATION: &str = "http.server.duration";
const METRIC_SERVER_REQUEST_COUNT: &str = "http.server.request_count";

/// The request view handed to the span name formatter.
#[derive(Clone, Copy, Debug)]
pub struct RequestContext<'a> {
    /// Request method.
    pub method: &'a str,
    /// Matched route template, empty when no route matched.
    pub route: &'a str,
    /// Raw request path.
    pub path: &'a str,
}

/// Produces the span name from the operation name and the matched request.
pub type SpanNameFormatter =
    Arc<dyn Fn(&str, &RequestContext<'_>) -> String + Send + Sync>;

fn default_span_name(_operation: &str, request: &RequestContext<'_>) -> String {
    if request.route.is_empty() {
        format!("HTTP {} route not found", request.method)
    } else {
        request.route.to_owned()
    }
}

/// OpenTelemetry middleware installed on an HTTP framework's handler chain.
///
/// One instance per server; every request shares it read-only and carries
/// its own state in the returned [`RequestGuard`].
pub struct Middleware {
    base: otel_instrument::Instrumentation,
    span_name: SpanNameFormatter,
    server_name: Option<String>,
    duration: Histogram<f64>,
    request_count: Counter<u64>,
}

impl Middleware {
    /// Starts building a middleware.
    pub fn builder() -> MiddlewareBuilder {
        MiddlewareBuilder {
            base: otel_instrument::Instrumentation::builder(INSTRUMENTATION_NAME),
            span_name: None,
            server_name: None,
        }
    }

    /// Opens the request span. The parent context is extracted from the
    /// request headers; the returned guard must be handed to
    /// [`on_response`], and ends the span itself if it is dropped first.
    ///
    /// [`on_response`]: Middleware::on_response
    pub fn on_request<B>(&self, request: &http::Request<B>, route: &str) -> RequestGuard {
        let parent = self
            .base
            .extract(&Context::current(), &HeaderExtractor(request.headers()));

        let method = request.method().as_str();
        let mut attrs = vec![
            KeyValue::new(HTTP_REQUEST_METHOD, method.to_owned()),
            KeyValue::new(URL_PATH, request.uri().path().to_owned()),
            KeyValue::new(
                URL_SCHEME,
                request.uri().scheme_str().unwrap_or("http").to_owned(),
            ),
            KeyValue::new(NETWORK_TRANSPORT, "tcp"),
        ];
        if !route.is_empty() {
            attrs.push(KeyValue::new(HTTP_ROUTE, route.to_owned()));
        }
        let server_address = self
            .server_name
            .clone()
            .or_else(|| request.uri().host().map(str::to_owned))
            .or_else(|| {
                request
                    .headers()
                    .get(http::header::HOST)
                    .and_then(|host| host.to_str().ok())
                    .map(str::to_owned)
            });
        if let Some(address) = &server_address {
            attrs.push(KeyValue::new(SERVER_ADDRESS, address.clone()));
        }
        if let Some(agent) = request
            .headers()
            .get(http::header::USER_AGENT)
            .and_then(|agent| agent.to_str().ok())
        {
            attrs.push(KeyValue::new(USER_AGENT_ORIGINAL, agent.to_owned()));
        }

        let mut metric_attrs = vec![KeyValue::new(HTTP_REQUEST_METHOD, method.to_owned())];
        if !route.is_empty() {
            metric_attrs.push(KeyValue::new(HTTP_ROUTE, route.to_owned()));
        }
        if let Some(address) = server_address {
            metric_attrs.push(KeyValue::new(SERVER_ADDRESS, address));
        }

        let name = (self.span_name)(
            self.base.operation_name(),
            &RequestContext {
                method,
                route,
                path: request.uri().path(),
            },
        );
        let cx = StartTime::attach(&parent);
        let span = self.base.start_span(name, SpanKind::Server, attrs, &cx);

        RequestGuard {
            cx: cx.with_span(span),
            metric_attrs,
            finished: false,
        }
    }

    /// Closes the request span with the response status, records any
    /// handler error, and feeds the request counter and the duration
    /// histogram.
    pub fn on_response(
        &self,
        mut guard: RequestGuard,
        status: http::StatusCode,
        error: Option<&dyn std::error::Error>,
    ) {
        {
            let span = guard.cx.span();
            span.set_attribute(KeyValue::new(
                HTTP_RESPONSE_STATUS_CODE,
                i64::from(status.as_u16()),
            ));
            if let Some(error) = error {
                span.record_error(error);
            }
            span.set_status(http_status(status.as_u16(), SpanKind::Server));
            span.end();
        }
        guard.finished = true;

        let mut attrs = std::mem::take(&mut guard.metric_attrs);
        attrs.push(KeyValue::new(
            HTTP_RESPONSE_STATUS_CODE,
            i64::from(status.as_u16()),
        ));
        self.request_count.add(1, &attrs);
        self.duration
            .record(StartTime::elapsed_millis(&guard.cx), &attrs);
    }
}

/// Owns the request span between the two middleware halves.
///
/// Dropping the guard without [`Middleware::on_response`] still ends the
/// span, with whatever state it had.
pub struct RequestGuard {
    cx: Context,
    metric_attrs: Vec<KeyValue>,
    finished: bool,
}

impl RequestGuard {
    /// The context carrying the request span, for the handler to parent
    /// its own telemetry under.
    pub fn context(&self) -> &Context {
        &self.cx
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        if !self.finished {
            self.cx.span().end();
        }
    }
}

/// Builder for [`Middleware`].
pub struct MiddlewareBuilder {
    base: InstrumentationBuilder,
    span_name: Option<SpanNameFormatter>,
    server_name: Option<String>,
}

impl MiddlewareBuilder {
    /// Resolves the tracer from the given provider instead of the global one.
    pub fn with_tracer_provider<P>(mut self, provider: &P) -> Self
    where
        P: TracerProvider,
        P::Tracer: Tracer + Send + Sync + 'static,
        <P::Tracer as Tracer>::Span: Span + Send + Sync + 'static,
    {
        self.base = self.base.with_tracer_provider(provider);
        self
    }

    /// Resolves the meter from the given provider instead of the global one.
    pub fn with_meter_provider<M: MeterProvider>(mut self, provider: &M) -> Self {
        self.base = self.base.with_meter_provider(provider);
        self
    }

    /// Uses the given propagator instead of the global one.
    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.base = self.base.with_propagator(propagator);
        self
    }

    /// Overrides the default operation name (`http-server`).
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_operation_name(name);
        self
    }

    /// Sets the `server.address` attribute for every request, instead of
    /// reading it from the request URI or `Host` header.
    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Overrides the span name formatter.
    pub fn with_span_name_formatter(mut self, formatter: SpanNameFormatter) -> Self {
        self.span_name = Some(formatter);
        self
    }

    /// Builds the middleware.
    pub fn build(self) -> Middleware {
        let base = self.base.build(DEFAULT_OPERATION_NAME);
        let duration = base
            .meter()
            .f64_histogram(METRIC_SERVER_DURATION)
            .with_description("request processing time in milliseconds")
            .with_unit("ms")
            .build();
        let request_count = base
            .meter()
            .u64_counter(METRIC_SERVER_REQUEST_COUNT)
            .with_description("count of requests served")
            .with_unit("1")
            .build();

        Middleware {
            base,
            span_name: self
                .span_name
                .unwrap_or_else(|| Arc::new(default_span_name)),
            server_name: self.server_name,
            duration,
            request_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_span_name_is_the_route_template() {
        let name = default_span_name(
            "http-server",
            &RequestContext {
                method: "GET",
                route: "/users/:id",
                path: "/users/42",
            },
        );
        assert_eq!(name, "/users/:id");
    }

    #[test]
    fn unmatched_route_names_the_span_from_the_method() {
        let name = default_span_name(
            "http-server",
            &RequestContext {
                method: "POST",
                route: "",
                path: "/missing",
            },
        );
        assert_eq!(name, "HTTP POST route not found");
    }
}
