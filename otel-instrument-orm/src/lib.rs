//! OpenTelemetry instrumentation plugin for ORM query callbacks.
//!
//! The ORM registers [`SqlPlugin::before_query`] and
//! [`SqlPlugin::after_query`] on its create/query/update/delete/row/raw
//! callback chains. The pre-callback stamps the start time and opens a
//! `CLIENT` span carrying the connection attributes parsed from the driver
//! DSN (with the password stripped); the post-callback renames the span from
//! the rendered SQL, records the statement, applies the record-not-found
//! sentinel rule, and feeds the duration histogram.
//!
//! ```
//! use otel_instrument_orm::SqlPlugin;
//!
//! let plugin = SqlPlugin::builder("mysql", "user:pass@tcp(10.0.0.5:3306)/mydb").build()?;
//! # Ok::<(), otel_instrument_orm::Error>(())
//! ```

mod dsn;
mod plugin;

pub use dsn::{Dsn, DsnError};
pub use plugin::{
    sql_operation, Error, SpanNameFormatter, SqlPlugin, SqlPluginBuilder, StatementInfo,
};

/// Error surface the plugin inspects after a query completes.
///
/// [`is_record_not_found`] is the ORM's own predicate for its "no rows"
/// sentinel; the plugin never compares error values directly.
///
/// [`is_record_not_found`]: SqlError::is_record_not_found
pub trait SqlError: std::error::Error {
    /// True when this error is the ORM's record-not-found sentinel rather
    /// than a failure.
    fn is_record_not_found(&self) -> bool;
}
