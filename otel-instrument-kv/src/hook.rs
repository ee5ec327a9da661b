use std::sync::Arc;

use opentelemetry::metrics::Histogram;
use opentelemetry::metrics::MeterProvider;
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, KeyValue};
use opentelemetry_semantic_conventions::attribute::{
    DB_OPERATION_NAME, DB_QUERY_TEXT, DB_SYSTEM_NAME, SERVER_ADDRESS, SERVER_PORT,
};
use otel_instrument::{
    conv, finish_span, split_host_port, InstrumentationBuilder, InvalidAddress, StartTime,
};

use crate::{command_summary, commands_string, Command, CommandError};

const INSTRUMENTATION_NAME: &str = "otel-instrument-kv";
const DEFAULT_OPERATION_NAME: &str = "redis";

const METRIC_CLIENT_DURATION: &str = "db.redis.client.duration";

/// Produces the span name for a single command.
pub type SpanNameFormatter = Arc<dyn Fn(&str, &dyn Command) -> String + Send + Sync>;

/// Produces the span name for a pipelined batch.
pub type PipelineSpanNameFormatter =
    Arc<dyn Fn(&str, &[&dyn Command]) -> String + Send + Sync>;

/// Connection parameters of the wrapped client, recorded on every span.
#[derive(Clone, Debug)]
pub struct ConnectionInfo {
    /// Server address as `host:port`, or a bare host.
    pub addr: String,
    /// Username the client authenticates as, if any.
    pub username: Option<String>,
    /// Database index selected on the connection.
    pub db: i64,
}

/// OpenTelemetry hook registered with a key-value client.
///
/// One instance per client; safe to share across concurrent commands. All
/// per-command state travels in the [`Context`] returned by the pre-hooks.
pub struct CommandHook {
    base: otel_instrument::Instrumentation,
    span_name: SpanNameFormatter,
    pipeline_span_name: PipelineSpanNameFormatter,
    duration: Histogram<f64>,
    attrs: Vec<KeyValue>,
}

impl std::fmt::Debug for CommandHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHook")
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl CommandHook {
    /// Starts building a hook for a client connected per `info`.
    pub fn builder(info: ConnectionInfo) -> CommandHookBuilder {
        CommandHookBuilder {
            base: otel_instrument::Instrumentation::builder(INSTRUMENTATION_NAME),
            span_name: None,
            pipeline_span_name: None,
            info,
        }
    }

    /// Pre-hook for a single command. Returns the context the client must
    /// carry with the command and hand back to [`after_process`].
    ///
    /// [`after_process`]: CommandHook::after_process
    pub fn before_process(&self, cx: &Context, cmd: &dyn Command) -> Context {
        let mut attrs = self.attrs.clone();
        attrs.push(KeyValue::new(DB_OPERATION_NAME, cmd.name().to_owned()));
        attrs.push(KeyValue::new(DB_QUERY_TEXT, cmd.statement()));
        let name = (self.span_name)(self.base.operation_name(), cmd);
        self.base
            .start_recorded(cx, name, SpanKind::Client, attrs)
    }

    /// Post-hook for a single command. Ends the span and records the
    /// duration; `err` is the command's outcome, with the nil reply treated
    /// as a neutral status.
    pub fn after_process(&self, cx: &Context, cmd: &dyn Command, err: Option<&dyn CommandError>) {
        self.finish(cx, cmd.name().to_owned(), err);
    }

    /// Pre-hook for a pipelined batch.
    pub fn before_process_pipeline(&self, cx: &Context, cmds: &[&dyn Command]) -> Context {
        let mut attrs = self.attrs.clone();
        attrs.push(KeyValue::new(DB_OPERATION_NAME, command_summary(cmds)));
        attrs.push(KeyValue::new(DB_QUERY_TEXT, commands_string(cmds)));
        attrs.push(KeyValue::new(conv::DB_REDIS_NUM_CMD, cmds.len() as i64));
        let name = (self.pipeline_span_name)(self.base.operation_name(), cmds);
        self.base
            .start_recorded(cx, name, SpanKind::Client, attrs)
    }

    /// Post-hook for a pipelined batch; `err` is the batch's first error,
    /// if any.
    pub fn after_process_pipeline(
        &self,
        cx: &Context,
        cmds: &[&dyn Command],
        err: Option<&dyn CommandError>,
    ) {
        self.finish(cx, command_summary(cmds), err);
    }

    fn finish(&self, cx: &Context, operation: String, err: Option<&dyn CommandError>) {
        let sentinel = err.is_some_and(|e| e.is_nil());
        let error: Option<&dyn std::error::Error> = match err {
            Some(e) => Some(e),
            None => None,
        };
        let span = cx.span();
        finish_span(&span, error, sentinel);

        let mut attrs = self.attrs.clone();
        attrs.push(KeyValue::new(DB_OPERATION_NAME, operation));
        self.duration.record(StartTime::elapsed_millis(cx), &attrs);
    }
}

/// Builder for [`CommandHook`].
pub struct CommandHookBuilder {
    base: InstrumentationBuilder,
    span_name: Option<SpanNameFormatter>,
    pipeline_span_name: Option<PipelineSpanNameFormatter>,
    info: ConnectionInfo,
}

impl CommandHookBuilder {
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

    /// Overrides the default operation name (`redis`).
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_operation_name(name);
        self
    }

    /// Overrides the single-command span name formatter.
    pub fn with_span_name_formatter(mut self, formatter: SpanNameFormatter) -> Self {
        self.span_name = Some(formatter);
        self
    }

    /// Overrides the pipeline span name formatter.
    pub fn with_pipeline_span_name_formatter(
        mut self,
        formatter: PipelineSpanNameFormatter,
    ) -> Self {
        self.pipeline_span_name = Some(formatter);
        self
    }

    /// Builds the hook. Fails when the connection address carries a
    /// non-numeric port.
    pub fn build(self) -> Result<CommandHook, InvalidAddress> {
        let (host, port) = split_host_port(&self.info.addr)?;

        let mut attrs = vec![
            KeyValue::new(DB_SYSTEM_NAME, "redis"),
            KeyValue::new(SERVER_ADDRESS, host),
            KeyValue::new(SERVER_PORT, i64::from(port)),
            KeyValue::new(conv::DB_REDIS_DATABASE_INDEX, self.info.db),
        ];
        if let Some(username) = &self.info.username {
            attrs.push(KeyValue::new(conv::DB_USER, username.clone()));
        }

        let base = self.base.build(DEFAULT_OPERATION_NAME);
        let duration = base
            .meter()
            .f64_histogram(METRIC_CLIENT_DURATION)
            .with_description("process time in milliseconds")
            .with_unit("ms")
            .build();

        Ok(CommandHook {
            base,
            span_name: self
                .span_name
                .unwrap_or_else(|| Arc::new(default_span_name)),
            pipeline_span_name: self
                .pipeline_span_name
                .unwrap_or_else(|| Arc::new(default_pipeline_span_name)),
            duration,
            attrs,
        })
    }
}

fn default_span_name(_operation: &str, cmd: &dyn Command) -> String {
    cmd.name().to_owned()
}

fn default_pipeline_span_name(_operation: &str, cmds: &[&dyn Command]) -> String {
    format!("pipeline {}", command_summary(cmds))
}
