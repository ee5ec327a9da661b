//! Trace-context stamping for [`log`]-based structured loggers.
//!
//! [`TracedLogger`] decorates any [`log::Log`] implementation: records
//! emitted while a span is active are re-emitted with `trace_id` and
//! `span_id` key-values appended, so a log pipeline can join log lines to
//! traces. Records emitted outside a span pass through untouched.
//!
//! [`TraceContextSource`] is public on its own for hosts that already have
//! a logging pipeline and only want the two fields merged into it.

use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

/// Key under which the trace identifier is attached.
pub const TRACE_ID_KEY: &str = "trace_id";
/// Key under which the span identifier is attached.
pub const SPAN_ID_KEY: &str = "span_id";

/// A [`log::kv::Source`] yielding the `trace_id` and `span_id` of a span
/// context, captured at construction time.
///
/// The source is empty when the context had no valid recording span, so it
/// can be merged unconditionally.
#[derive(Clone, Debug, Default)]
pub struct TraceContextSource {
    trace_id: Option<String>,
    span_id: Option<String>,
}

impl TraceContextSource {
    /// Captures the span identifiers of the current context.
    pub fn from_current() -> Self {
        Self::from_context(&Context::current())
    }

    /// Captures the span identifiers of the given context. The result is
    /// empty unless the context's span is valid and recording.
    pub fn from_context(cx: &Context) -> Self {
        let span = cx.span();
        let span_context = span.span_context();
        if !span_context.is_valid() || !span.is_recording() {
            return Self::default();
        }
        TraceContextSource {
            trace_id: Some(span_context.trace_id().to_string()),
            span_id: Some(span_context.span_id().to_string()),
        }
    }

    fn is_empty(&self) -> bool {
        self.trace_id.is_none()
    }
}

impl log::kv::Source for TraceContextSource {
    fn visit<'kv>(
        &'kv self,
        visitor: &mut dyn log::kv::VisitSource<'kv>,
    ) -> Result<(), log::kv::Error> {
        if let Some(trace_id) = &self.trace_id {
            visitor.visit_pair(
                log::kv::Key::from_str(TRACE_ID_KEY),
                log::kv::Value::from(trace_id.as_str()),
            )?;
        }
        if let Some(span_id) = &self.span_id {
            visitor.visit_pair(
                log::kv::Key::from_str(SPAN_ID_KEY),
                log::kv::Value::from(span_id.as_str()),
            )?;
        }
        Ok(())
    }
}

// Record key-values first, trace identifiers appended after.
struct ChainedSource<'a> {
    record: &'a dyn log::kv::Source,
    trace: &'a TraceContextSource,
}

impl log::kv::Source for ChainedSource<'_> {
    fn visit<'kv>(
        &'kv self,
        visitor: &mut dyn log::kv::VisitSource<'kv>,
    ) -> Result<(), log::kv::Error> {
        self.record.visit(visitor)?;
        self.trace.visit(visitor)
    }
}

/// A [`log::Log`] decorator that appends the active trace context to every
/// record emitted under a span.
#[derive(Debug)]
pub struct TracedLogger<L> {
    inner: L,
}

impl<L: log::Log> TracedLogger<L> {
    /// Wraps the given logger.
    pub fn new(inner: L) -> Self {
        TracedLogger { inner }
    }

    /// The wrapped logger.
    pub fn inner(&self) -> &L {
        &self.inner
    }
}

impl<L: log::Log> log::Log for TracedLogger<L> {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record<'_>) {
        let trace = TraceContextSource::from_current();
        if trace.is_empty() {
            self.inner.log(record);
            return;
        }
        let chained = ChainedSource {
            record: record.key_values(),
            trace: &trace,
        };
        self.inner
            .log(&record.to_builder().key_values(&chained).build());
    }

    fn flush(&self) {
        self.inner.flush();
    }
}
