//! OpenTelemetry instrumentation for outbound HTTP clients.
//!
//! [`TracedClient`] wraps any [`opentelemetry_http::HttpClient`]: each send
//! runs under a `CLIENT` span whose context is injected into the outbound
//! headers, and feeds a duration histogram plus request and failure
//! counters. The wrapped client's result is returned untouched.
//!
//! ```
//! use otel_instrument_http::TracedClient;
//!
//! # fn wrap<C: opentelemetry_http::HttpClient>(inner: C) {
//! let client = TracedClient::builder(inner).build();
//! # let _ = client;
//! # }
//! ```

mod client;

pub use client::{SpanNameFormatter, TracedClient, TracedClientBuilder};
