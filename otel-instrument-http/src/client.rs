use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use opentelemetry::metrics::{Counter, Histogram, MeterProvider};
use opentelemetry::propagation::TextMapPropagator;
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, KeyValue};
use opentelemetry_http::{HeaderInjector, HttpClient, HttpError};
use opentelemetry_semantic_conventions::attribute::{
    HTTP_REQUEST_METHOD, HTTP_RESPONSE_STATUS_CODE, NETWORK_TRANSPORT, SERVER_ADDRESS,
    SERVER_PORT, URL_FULL,
};
use otel_instrument::{http_status, InstrumentationBuilder, StartTime};

const INSTRUMENTATION_NAME: &str = "otel-instrument-http";
const DEFAULT_OPERATION_NAME: &str = "http-client";

const METRIC_CLIENT_DURATION: &str = "http.client.duration";
const METRIC_CLIENT_REQUEST_COUNT: &str = "http.client.request_count";
const METRIC_CLIENT_REQUEST_FAILED_COUNT: &str = "http.client.request_failed_count";

/// Produces the span name from the operation name and the outbound request.
pub type SpanNameFormatter =
    Arc<dyn Fn(&str, &Request<Bytes>) -> String + Send + Sync>;

fn default_span_name(_operation: &str, request: &Request<Bytes>) -> String {
    request.uri().to_string()
}

/// An [`HttpClient`] that traces and meters every send of the wrapped
/// client.
pub struct TracedClient<C> {
    inner: C,
    base: otel_instrument::Instrumentation,
    span_name: SpanNameFormatter,
    duration: Histogram<f64>,
    request_count: Counter<u64>,
    request_failed_count: Counter<u64>,
}

impl<C: fmt::Debug> fmt::Debug for TracedClient<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracedClient")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

impl<C> TracedClient<C> {
    /// Starts building a traced client around the given inner client.
    pub fn builder(inner: C) -> TracedClientBuilder<C> {
        TracedClientBuilder {
            inner,
            base: otel_instrument::Instrumentation::builder(INSTRUMENTATION_NAME),
            span_name: None,
        }
    }

    fn request_attributes(&self, request: &Request<Bytes>) -> Vec<KeyValue> {
        let uri = request.uri();
        let mut attrs = vec![
            KeyValue::new(HTTP_REQUEST_METHOD, request.method().as_str().to_owned()),
            KeyValue::new(URL_FULL, uri.to_string()),
            KeyValue::new(NETWORK_TRANSPORT, "tcp"),
        ];
        if let Some(host) = uri.host() {
            attrs.push(KeyValue::new(SERVER_ADDRESS, host.to_owned()));
        }
        if let Some(port) = uri.port_u16() {
            attrs.push(KeyValue::new(SERVER_PORT, i64::from(port)));
        }
        attrs
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for TracedClient<C> {
    async fn send_bytes(&self, mut request: Request<Bytes>) -> Result<Response<Bytes>, HttpError> {
        let attrs = self.request_attributes(&request);
        let mut metric_attrs: Vec<KeyValue> = attrs
            .iter()
            .filter(|kv| kv.key.as_str() != URL_FULL)
            .cloned()
            .collect();

        let cx = StartTime::attach(&Context::current());
        let span = self.base.start_span(
            (self.span_name)(self.base.operation_name(), &request),
            SpanKind::Client,
            attrs,
            &cx,
        );
        let cx = cx.with_span(span);

        self.base
            .inject(&cx, &mut HeaderInjector(request.headers_mut()));

        let result = self.inner.send_bytes(request).await;

        let span = cx.span();
        match &result {
            Ok(response) => {
                let code = response.status().as_u16();
                span.set_attribute(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(code),
                ));
                span.set_status(http_status(code, SpanKind::Client));
                metric_attrs.push(KeyValue::new(
                    HTTP_RESPONSE_STATUS_CODE,
                    i64::from(code),
                ));
            }
            Err(error) => {
                span.record_error(error.as_ref());
                span.set_status(Status::error(error.to_string()));
                self.request_failed_count.add(1, &metric_attrs);
            }
        }
        span.end();

        self.request_count.add(1, &metric_attrs);
        self.duration
            .record(StartTime::elapsed_millis(&cx), &metric_attrs);

        result
    }
}

/// Builder for [`TracedClient`].
pub struct TracedClientBuilder<C> {
    inner: C,
    base: InstrumentationBuilder,
    span_name: Option<SpanNameFormatter>,
}

impl<C> TracedClientBuilder<C> {
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

    /// Overrides the default operation name (`http-client`).
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_operation_name(name);
        self
    }

    /// Overrides the span name formatter.
    pub fn with_span_name_formatter(mut self, formatter: SpanNameFormatter) -> Self {
        self.span_name = Some(formatter);
        self
    }

    /// Builds the traced client.
    pub fn build(self) -> TracedClient<C> {
        let base = self.base.build(DEFAULT_OPERATION_NAME);
        let duration = base
            .meter()
            .f64_histogram(METRIC_CLIENT_DURATION)
            .with_description("request send time in milliseconds")
            .with_unit("ms")
            .build();
        let request_count = base
            .meter()
            .u64_counter(METRIC_CLIENT_REQUEST_COUNT)
            .with_description("count of requests sent")
            .with_unit("1")
            .build();
        let request_failed_count = base
            .meter()
            .u64_counter(METRIC_CLIENT_REQUEST_FAILED_COUNT)
            .with_description("count of requests that failed at the transport")
            .with_unit("1")
            .build();

        TracedClient {
            inner: self.inner,
            base,
            span_name: self
                .span_name
                .unwrap_or_else(|| Arc::new(default_span_name)),
            duration,
            request_count,
            request_failed_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_span_name_is_the_request_uri() {
        let request = Request::get("https://api.example.com/v1/items?page=2")
            .body(Bytes::new())
            .expect("request");
        assert_eq!(
            default_span_name("http-client", &request),
            "https://api.example.com/v1/items?page=2"
        );
    }
}
