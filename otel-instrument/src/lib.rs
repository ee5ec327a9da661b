//! Shared plumbing for the `otel-instrument-*` adapter crates.
//!
//! Every adapter in this workspace follows the same shape: an immutable
//! configuration resolved once at construction time, a pre-hook that stamps a
//! start time and opens a span, and a post-hook that closes the span and
//! records duration/count metrics. This crate holds the pieces that are
//! identical across adapters:
//!
//! - [`Instrumentation`] and [`InstrumentationBuilder`]: provider/propagator
//!   resolution with process-global defaults and explicit overrides.
//! - [`StartTime`]: the per-operation context side channel carrying the
//!   operation's start instant between the hook halves.
//! - [`split_host_port`] and [`Transport`]: address parsing shared by the
//!   client adapters.
//! - Span status helpers applying the sentinel-error rule ("no result" is not
//!   a failure) and the HTTP status mapping.
//!
//! Host applications normally depend on the adapter crates rather than on
//! this one directly.

mod config;
mod context;
pub mod conv;
mod net;
mod status;

pub use config::{Instrumentation, InstrumentationBuilder};
pub use context::StartTime;
pub use net::{split_host_port, InvalidAddress, Transport};
pub use status::{finish_span, http_status, status_for};
