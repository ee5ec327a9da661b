use opentelemetry::global::{self, BoxedSpan, BoxedTracer};
use opentelemetry::metrics::{Meter, MeterProvider};
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, InstrumentationScope, KeyValue};

use crate::context::StartTime;

/// Resolved telemetry handles shared by every invocation of an adapter's
/// hooks.
///
/// Built once per adapter instance via [`Instrumentation::builder`] and
/// immutable afterwards, so it can be read concurrently from however many
/// operations the wrapped library runs at once.
pub struct Instrumentation {
    tracer: BoxedTracer,
    meter: Meter,
    propagator: Option<Box<dyn TextMapPropagator + Send + Sync>>,
    operation_name: String,
}

impl Instrumentation {
    /// Starts building an `Instrumentation` for the named adapter scope.
    ///
    /// The scope name becomes the instrumentation library name on the
    /// resolved tracer and meter.
    pub fn builder(scope_name: &'static str) -> InstrumentationBuilder {
        InstrumentationBuilder {
            scope: InstrumentationScope::builder(scope_name)
                .with_version(env!("CARGO_PKG_VERSION"))
                .build(),
            tracer: None,
            meter: None,
            propagator: None,
            operation_name: None,
        }
    }

    /// The configured operation name, used as the formatter input and as the
    /// placeholder span name where the final name is only known afterwards.
    pub fn operation_name(&self) -> &str {
        &self.operation_name
    }

    /// The resolved meter, for adapters to build their instruments from.
    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Unconditionally starts a span as a child of `parent`.
    ///
    /// Used by the adapters that own the whole call (server middleware, the
    /// client transport) and therefore always trace it.
    pub fn start_span(
        &self,
        name: String,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
        parent: &Context,
    ) -> BoxedSpan {
        self.tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent)
    }

    /// Pre-hook half of the hook pattern for outbound client adapters.
    ///
    /// Stamps the start time into the returned context. When the ambient
    /// span is not recording, no child span is opened and only the stamp is
    /// carried; the post-hook still computes a duration from it.
    pub fn start_recorded(
        &self,
        cx: &Context,
        name: String,
        kind: SpanKind,
        attributes: Vec<KeyValue>,
    ) -> Context {
        let cx = StartTime::attach(cx);
        if !cx.span().is_recording() {
            return cx;
        }
        let span = self.start_span(name, kind, attributes, &cx);
        cx.with_span(span)
    }

    /// Extracts a parent context from an incoming carrier using the
    /// configured propagator, or the global one when none was set.
    pub fn extract(&self, cx: &Context, carrier: &dyn Extractor) -> Context {
        match &self.propagator {
            Some(propagator) => propagator.extract_with_context(cx, carrier),
            None => global::get_text_map_propagator(|propagator| {
                propagator.extract_with_context(cx, carrier)
            }),
        }
    }

    /// Injects `cx` into an outbound carrier using the configured
    /// propagator, or the global one when none was set.
    pub fn inject(&self, cx: &Context, carrier: &mut dyn Injector) {
        match &self.propagator {
            Some(propagator) => propagator.inject_context(cx, carrier),
            None => global::get_text_map_propagator(|propagator| {
                propagator.inject_context(cx, carrier)
            }),
        }
    }
}

/// Builder for [`Instrumentation`].
///
/// Defaults to the process-global tracer provider, meter provider and
/// text-map propagator; each `with_*` call overrides one of them, applied in
/// call order.
pub struct InstrumentationBuilder {
    scope: InstrumentationScope,
    tracer: Option<BoxedTracer>,
    meter: Option<Meter>,
    propagator: Option<Box<dyn TextMapPropagator + Send + Sync>>,
    operation_name: Option<String>,
}

impl InstrumentationBuilder {
    /// Resolves the tracer from the given provider instead of the global one.
    pub fn with_tracer_provider<P>(mut self, provider: &P) -> Self
    where
        P: TracerProvider,
        P::Tracer: Tracer + Send + Sync + 'static,
        <P::Tracer as Tracer>::Span: Span + Send + Sync + 'static,
    {
        self.tracer = Some(BoxedTracer::new(Box::new(
            provider.tracer_with_scope(self.scope.clone()),
        )));
        self
    }

    /// Resolves the meter from the given provider instead of the global one.
    pub fn with_meter_provider<M>(mut self, provider: &M) -> Self
    where
        M: MeterProvider,
    {
        self.meter = Some(provider.meter_with_scope(self.scope.clone()));
        self
    }

    /// Uses the given propagator instead of the global one.
    pub fn with_propagator<P>(mut self, propagator: P) -> Self
    where
        P: TextMapPropagator + Send + Sync + 'static,
    {
        self.propagator = Some(Box::new(propagator));
        self
    }

    /// Overrides the adapter's default operation name.
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Finishes the build, falling back to the adapter's default operation
    /// name and to the global providers for anything not overridden.
    pub fn build(self, default_operation_name: &str) -> Instrumentation {
        let tracer = self.tracer.unwrap_or_else(|| {
            global::tracer_provider().tracer_with_scope(self.scope.clone())
        });
        let meter = self
            .meter
            .unwrap_or_else(|| global::meter_with_scope(self.scope.clone()));
        Instrumentation {
            tracer,
            meter,
            propagator: self.propagator,
            operation_name: self
                .operation_name
                .unwrap_or_else(|| default_operation_name.to_owned()),
        }
    }
}
