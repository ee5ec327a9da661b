use std::fmt;
use std::sync::Arc;

use opentelemetry::trace::{SpanId, SpanKind, Status, TraceId};
use opentelemetry::{KeyValue, Value};
use opentelemetry_sdk::metrics::data::{Histogram, Sum};
use opentelemetry_sdk::metrics::{InMemoryMetricExporter, SdkMeterProvider};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{InMemorySpanExporter, SdkTracerProvider, SpanData};
use otel_instrument_web::Middleware;

#[derive(Debug)]
struct HandlerError(&'static str);

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl std::error::Error for HandlerError {}

struct Setup {
    span_exporter: InMemorySpanExporter,
    metric_exporter: InMemoryMetricExporter,
    meter_provider: SdkMeterProvider,
    middleware: Middleware,
}

fn setup() -> Setup {
    let span_exporter = InMemorySpanExporter::default();
    let tracer_provider = SdkTracerProvider::builder()
        .with_simple_exporter(span_exporter.clone())
        .build();
    let metric_exporter = InMemoryMetricExporter::default();
    let meter_provider = SdkMeterProvider::builder()
        .with_periodic_exporter(metric_exporter.clone())
        .build();
    let middleware = Middleware::builder()
        .with_tracer_provider(&tracer_provider)
        .with_meter_provider(&meter_provider)
        .with_propagator(TraceContextPropagator::new())
        .build();
    Setup {
        span_exporter,
        metric_exporter,
        meter_provider,
        middleware,
    }
}

fn attr<'a>(span: &'a SpanData, key: &str) -> Option<&'a Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| &kv.value)
}

fn only_span(setup: &Setup) -> SpanData {
    let spans = setup.span_exporter.get_finished_spans().expect("spans");
    assert_eq!(spans.len(), 1, "span must be ended exactly once");
    spans.into_iter().next().expect("span")
}

#[test]
fn request_span_carries_request_attributes() {
    let setup = setup();
    let request = http::Request::get("http://api.example.com/users/42")
        .header(http::header::USER_AGENT, "curl/8.0")
        .body(())
        .expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    setup
        .middleware
        .on_response(guard, http::StatusCode::OK, None);

    let span = only_span(&setup);
    assert_eq!(span.name, "/users/:id");
    assert_eq!(span.span_kind, SpanKind::Server);
    assert_eq!(span.status, Status::Unset);
    assert_eq!(
        attr(&span, "http.request.method"),
        Some(&Value::from("GET"))
    );
    assert_eq!(attr(&span, "url.path"), Some(&Value::from("/users/42")));
    assert_eq!(attr(&span, "url.scheme"), Some(&Value::from("http")));
    assert_eq!(
        attr(&span, "http.route"),
        Some(&Value::from("/users/:id"))
    );
    assert_eq!(
        attr(&span, "server.address"),
        Some(&Value::from("api.example.com"))
    );
    assert_eq!(
        attr(&span, "user_agent.original"),
        Some(&Value::from("curl/8.0"))
    );
    assert_eq!(
        attr(&span, "network.transport"),
        Some(&Value::from("tcp"))
    );
    assert_eq!(
        attr(&span, "http.response.status_code"),
        Some(&Value::from(200_i64))
    );
}

#[test]
fn remote_parent_is_extracted_from_the_traceparent_header() {
    let setup = setup();
    let request = http::Request::get("/users/42")
        .header(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        )
        .body(())
        .expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    setup
        .middleware
        .on_response(guard, http::StatusCode::OK, None);

    let span = only_span(&setup);
    assert_eq!(
        span.span_context.trace_id(),
        TraceId::from_hex("0af7651916cd43dd8448eb211c80319c").expect("trace id")
    );
    assert_eq!(
        span.parent_span_id,
        SpanId::from_hex("b7ad6b7169203331").expect("span id")
    );
}

#[test]
fn server_error_status_marks_the_span() {
    let setup = setup();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    setup
        .middleware
        .on_response(guard, http::StatusCode::INTERNAL_SERVER_ERROR, None);

    let span = only_span(&setup);
    assert!(matches!(span.status, Status::Error { .. }));
    assert_eq!(
        attr(&span, "http.response.status_code"),
        Some(&Value::from(500_i64))
    );
}

#[test]
fn client_error_status_leaves_the_server_span_unset() {
    let setup = setup();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    setup
        .middleware
        .on_response(guard, http::StatusCode::NOT_FOUND, None);

    let span = only_span(&setup);
    assert_eq!(span.status, Status::Unset);
}

#[test]
fn handler_error_is_recorded_on_the_span() {
    let setup = setup();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    let err = HandlerError("template render failed");
    setup
        .middleware
        .on_response(guard, http::StatusCode::INTERNAL_SERVER_ERROR, Some(&err));

    let span = only_span(&setup);
    assert!(span.events.iter().any(|event| event.name == "exception"));
}

#[test]
fn dropped_guard_still_ends_the_span() {
    let setup = setup();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    drop(guard);

    let span = only_span(&setup);
    assert_eq!(span.name, "/users/:id");
    assert_eq!(attr(&span, "http.response.status_code"), None);
}

#[test]
fn unmatched_route_gets_the_fallback_name_and_no_route_attribute() {
    let setup = setup();
    let request = http::Request::post("/nope").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "");
    setup
        .middleware
        .on_response(guard, http::StatusCode::NOT_FOUND, None);

    let span = only_span(&setup);
    assert_eq!(span.name, "HTTP POST route not found");
    assert_eq!(attr(&span, "http.route"), None);
}

#[test]
fn configured_server_name_wins_over_the_host_header() {
    let span_exporter = InMemorySpanExporter::default();
    let tracer_provider = SdkTracerProvider::builder()
        .with_simple_exporter(span_exporter.clone())
        .build();
    let middleware = Middleware::builder()
        .with_tracer_provider(&tracer_provider)
        .with_server_name("frontend")
        .build();
    let request = http::Request::get("/users/42")
        .header(http::header::HOST, "api.example.com")
        .body(())
        .expect("request");

    let guard = middleware.on_request(&request, "/users/:id");
    middleware.on_response(guard, http::StatusCode::OK, None);

    let spans = span_exporter.get_finished_spans().expect("spans");
    assert_eq!(
        attr(&spans[0], "server.address"),
        Some(&Value::from("frontend"))
    );
}

#[test]
fn custom_formatter_receives_the_operation_name() {
    let span_exporter = InMemorySpanExporter::default();
    let tracer_provider = SdkTracerProvider::builder()
        .with_simple_exporter(span_exporter.clone())
        .build();
    let middleware = Middleware::builder()
        .with_tracer_provider(&tracer_provider)
        .with_operation_name("edge")
        .with_span_name_formatter(Arc::new(|operation, request| {
            format!("{operation} {} {}", request.method, request.route)
        }))
        .build();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = middleware.on_request(&request, "/users/:id");
    middleware.on_response(guard, http::StatusCode::OK, None);

    let spans = span_exporter.get_finished_spans().expect("spans");
    assert_eq!(spans[0].name, "edge GET /users/:id");
}

#[test]
fn metrics_count_and_time_the_request() {
    let setup = setup();
    let request = http::Request::get("/users/42").body(()).expect("request");

    let guard = setup.middleware.on_request(&request, "/users/:id");
    setup
        .middleware
        .on_response(guard, http::StatusCode::OK, None);

    setup.meter_provider.force_flush().expect("flush metrics");
    let metrics = setup
        .metric_exporter
        .get_finished_metrics()
        .expect("finished metrics");
    let scope_metrics = &metrics[0].scope_metrics[0].metrics;

    let duration = scope_metrics
        .iter()
        .find(|metric| metric.name == "http.server.duration")
        .expect("duration metric");
    assert_eq!(duration.unit, "ms");
    let histogram = duration
        .data
        .as_any()
        .downcast_ref::<Histogram<f64>>()
        .expect("histogram aggregation");
    assert_eq!(histogram.data_points.len(), 1);
    assert_eq!(histogram.data_points[0].count, 1);

    let count = scope_metrics
        .iter()
        .find(|metric| metric.name == "http.server.request_count")
        .expect("request counter");
    let sum = count
        .data
        .as_any()
        .downcast_ref::<Sum<u64>>()
        .expect("sum aggregation");
    assert_eq!(sum.data_points[0].value, 1);
    let expected = [
        KeyValue::new("http.request.method", "GET"),
        KeyValue::new("http.route", "/users/:id"),
        KeyValue::new("http.response.status_code", 200_i64),
    ];
    for kv in expected {
        assert!(
            sum.data_points[0].attributes.contains(&kv),
            "counter must carry {}",
            kv.key
        );
    }
}
