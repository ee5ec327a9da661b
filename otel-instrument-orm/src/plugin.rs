use std::sync::Arc;

use opentelemetry::metrics::{Histogram, MeterProvider};
use opentelemetry::trace::{Span, SpanKind, TraceContextExt, Tracer, TracerProvider};
use opentelemetry::{Context, KeyValue};
use opentelemetry_semantic_conventions::attribute::{
    DB_NAMESPACE, DB_OPERATION_NAME, DB_QUERY_TEXT, DB_SYSTEM_NAME, NETWORK_PEER_ADDRESS,
    NETWORK_PEER_PORT, NETWORK_TRANSPORT,
};
use otel_instrument::{
    conv, finish_span, split_host_port, InstrumentationBuilder, InvalidAddress, StartTime,
    Transport,
};
use thiserror::Error;

use crate::dsn::{Dsn, DsnError};
use crate::SqlError;

const INSTRUMENTATION_NAME: &str = "otel-instrument-orm";
const DEFAULT_OPERATION_NAME: &str = "sql";

const METRIC_CLIENT_DURATION: &str = "db.sql.client.duration";

/// Construction failure for [`SqlPlugin`].
#[derive(Debug, Error)]
pub enum Error {
    /// The driver is not one the plugin knows how to describe.
    #[error("unsupported driver {0:?}")]
    UnsupportedDriver(String),
    /// The DSN did not parse.
    #[error(transparent)]
    Dsn(#[from] DsnError),
    /// The DSN's address had a non-numeric port.
    #[error(transparent)]
    Address(#[from] InvalidAddress),
}

/// The statement view handed to the post-callback and the span name
/// formatter: the rendered SQL and the target table.
#[derive(Clone, Copy, Debug)]
pub struct StatementInfo<'a> {
    /// Rendered SQL text.
    pub sql: &'a str,
    /// Target table name, possibly empty for raw statements.
    pub table: &'a str,
}

/// Produces the span name from the operation name and the statement.
pub type SpanNameFormatter =
    Arc<dyn Fn(&str, &StatementInfo<'_>) -> String + Send + Sync>;

/// Leading whitespace-delimited token of a SQL statement, used for the
/// `db.operation.name` attribute (`SELECT`, `INSERT`, ...).
pub fn sql_operation(sql: &str) -> &str {
    match sql.find(' ') {
        Some(i) => &sql[..i],
        None => sql,
    }
}

fn default_span_name(operation: &str, stmt: &StatementInfo<'_>) -> String {
    match stmt.sql.find(' ') {
        Some(i) => format!("{} {}", &stmt.sql[..i], stmt.table),
        None => operation.to_owned(),
    }
}

/// OpenTelemetry plugin registered on an ORM's callback chains.
///
/// One instance per database handle; connection attributes are parsed once
/// from the DSN at construction time and shared read-only by every query.
pub struct SqlPlugin {
    base: otel_instrument::Instrumentation,
    span_name: SpanNameFormatter,
    duration: Histogram<f64>,
    attrs: Vec<KeyValue>,
}

impl std::fmt::Debug for SqlPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlPlugin")
            .field("attrs", &self.attrs)
            .finish_non_exhaustive()
    }
}

impl SqlPlugin {
    /// Starts building a plugin for the given driver and DSN. Only the
    /// `mysql` driver is supported; anything else fails at [`build`].
    ///
    /// [`build`]: SqlPluginBuilder::build
    pub fn builder(driver: impl Into<String>, dsn: impl Into<String>) -> SqlPluginBuilder {
        SqlPluginBuilder {
            base: otel_instrument::Instrumentation::builder(INSTRUMENTATION_NAME),
            span_name: None,
            driver: driver.into(),
            dsn: dsn.into(),
        }
    }

    /// Pre-callback: stamps the start time and, when the ambient span is
    /// recording, opens the query span. The returned context must be
    /// carried on the statement and handed back to [`after_query`].
    ///
    /// [`after_query`]: SqlPlugin::after_query
    pub fn before_query(&self, cx: &Context) -> Context {
        self.base.start_recorded(
            cx,
            self.base.operation_name().to_owned(),
            SpanKind::Client,
            self.attrs.clone(),
        )
    }

    /// Post-callback: names the span from the rendered statement, records
    /// the outcome and the duration. The record-not-found sentinel is a
    /// neutral outcome, not an error.
    pub fn after_query(
        &self,
        cx: &Context,
        stmt: &StatementInfo<'_>,
        err: Option<&dyn SqlError>,
    ) {
        let span = cx.span();
        span.update_name((self.span_name)(self.base.operation_name(), stmt));
        span.set_attribute(KeyValue::new(DB_QUERY_TEXT, stmt.sql.to_owned()));
        span.set_attribute(KeyValue::new(
            DB_OPERATION_NAME,
            sql_operation(stmt.sql).to_owned(),
        ));

        let sentinel = err.is_some_and(|e| e.is_record_not_found());
        let error: Option<&dyn std::error::Error> = match err {
            Some(e) => Some(e),
            None => None,
        };
        finish_span(&span, error, sentinel);

        let mut attrs = self.attrs.clone();
        attrs.push(KeyValue::new(
            DB_OPERATION_NAME,
            sql_operation(stmt.sql).to_owned(),
        ));
        self.duration.record(StartTime::elapsed_millis(cx), &attrs);
    }
}

/// Builder for [`SqlPlugin`].
pub struct SqlPluginBuilder {
    base: InstrumentationBuilder,
    span_name: Option<SpanNameFormatter>,
    driver: String,
    dsn: String,
}

impl SqlPluginBuilder {
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

    /// Overrides the default operation name (`sql`).
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.base = self.base.with_operation_name(name);
        self
    }

    /// Overrides the span name formatter.
    pub fn with_span_name_formatter(mut self, formatter: SpanNameFormatter) -> Self {
        self.span_name = Some(formatter);
        self
    }

    /// Builds the plugin, parsing the DSN into the connection attribute
    /// set. Fails on an unknown driver, a malformed DSN, or a non-numeric
    /// port.
    pub fn build(self) -> Result<SqlPlugin, Error> {
        if self.driver != "mysql" {
            return Err(Error::UnsupportedDriver(self.driver));
        }

        let dsn = Dsn::parse(&self.dsn)?;
        let (host, port) = split_host_port(&dsn.addr)?;
        let transport = Transport::from_network(&dsn.net);

        let mut attrs = vec![
            KeyValue::new(DB_SYSTEM_NAME, "mysql"),
            KeyValue::new(conv::DB_CONNECTION_STRING, dsn.redacted()),
            KeyValue::new(NETWORK_PEER_ADDRESS, host),
            KeyValue::new(NETWORK_PEER_PORT, i64::from(port)),
            KeyValue::new(NETWORK_TRANSPORT, transport.as_str()),
            KeyValue::new(DB_NAMESPACE, dsn.database.clone()),
        ];
        if !dsn.user.is_empty() {
            attrs.push(KeyValue::new(conv::DB_USER, dsn.user.clone()));
        }

        let base = self.base.build(DEFAULT_OPERATION_NAME);
        let duration = base
            .meter()
            .f64_histogram(METRIC_CLIENT_DURATION)
            .with_description("process time in milliseconds")
            .with_unit("ms")
            .build();

        Ok(SqlPlugin {
            base,
            span_name: self
                .span_name
                .unwrap_or_else(|| Arc::new(default_span_name)),
            duration,
            attrs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_span_name_is_verb_and_table() {
        let stmt = StatementInfo {
            sql: "SELECT * FROM users WHERE id = ?",
            table: "users",
        };
        assert_eq!(default_span_name("sql", &stmt), "SELECT users");
        // Pure function: same input, same name.
        assert_eq!(default_span_name("sql", &stmt), "SELECT users");
    }

    #[test]
    fn whitespace_free_sql_falls_back_to_the_operation_name() {
        let stmt = StatementInfo {
            sql: "COMMIT",
            table: "",
        };
        assert_eq!(default_span_name("sql", &stmt), "sql");
    }

    #[test]
    fn sql_operation_is_the_leading_token() {
        assert_eq!(sql_operation("SELECT * FROM users"), "SELECT");
        assert_eq!(sql_operation("COMMIT"), "COMMIT");
    }

    #[test]
    fn unknown_driver_fails_construction() {
        let err = SqlPlugin::builder("postgres", "user@tcp(db:5432)/app")
            .build()
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedDriver(name) if name == "postgres"));
    }
}
