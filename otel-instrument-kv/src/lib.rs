//! OpenTelemetry instrumentation hook for key-value store clients speaking
//! the redis protocol.
//!
//! The client library calls [`CommandHook::before_process`] with the
//! per-command context before it writes the command to the wire, threads the
//! returned [`Context`] through its own command state, and calls
//! [`CommandHook::after_process`] with the same context once the reply is
//! in. Pipelined batches use the `*_pipeline` pair. The hook opens a
//! `CLIENT` span per command (or batch), records the command text and
//! connection attributes, and feeds a duration histogram; the client's "nil
//! reply" for a missing key is reported as a neutral outcome, not as an
//! error.
//!
//! ```
//! use otel_instrument_kv::{CommandHook, ConnectionInfo};
//!
//! let hook = CommandHook::builder(ConnectionInfo {
//!     addr: "127.0.0.1:6379".into(),
//!     username: None,
//!     db: 0,
//! })
//! .build()?;
//! # Ok::<(), otel_instrument::InvalidAddress>(())
//! ```
//!
//! [`Context`]: opentelemetry::Context

mod hook;

pub use hook::{
    CommandHook, CommandHookBuilder, ConnectionInfo, PipelineSpanNameFormatter,
    SpanNameFormatter,
};

/// Capability surface the hook needs from a client command.
///
/// Any command representation of a compliant client satisfies this; the hook
/// never inspects replies or arguments beyond what is declared here.
pub trait Command {
    /// Canonical command name, including any subcommand (`GET`,
    /// `CLUSTER INFO`).
    fn name(&self) -> &str;

    /// The command rendered with its arguments, for the `db.query.text`
    /// attribute.
    fn statement(&self) -> String;
}

/// Error surface the hook inspects after a command completes.
///
/// [`is_nil`] is the client's own "was this the no-value reply" predicate;
/// the hook deliberately never compares error values directly, so clients
/// that wrap or convert their sentinel keep working.
///
/// [`is_nil`]: CommandError::is_nil
pub trait CommandError: std::error::Error {
    /// True when this error is the "no value" reply for a missing key rather
    /// than a failure.
    fn is_nil(&self) -> bool;
}

/// Space-joined command names summarizing a pipelined batch.
pub fn command_summary(cmds: &[&dyn Command]) -> String {
    cmds.iter()
        .map(|cmd| cmd.name())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Semicolon-joined rendering of a pipelined batch, for `db.query.text`.
pub fn commands_string(cmds: &[&dyn Command]) -> String {
    cmds.iter()
        .map(|cmd| cmd.statement())
        .collect::<Vec<_>>()
        .join("; ")
}
