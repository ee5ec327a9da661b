use std::time::{Duration, Instant};

use opentelemetry::Context;

/// Start-of-operation stamp carried in the per-operation [`Context`] between
/// an adapter's pre- and post-hook.
///
/// Context values are keyed by type, so this acts as a private,
/// collision-free side channel: no other crate can read or overwrite the
/// stamp. The stamp travels only with its own operation's context and is
/// never stored on the adapter, which keeps concurrent operations from
/// contaminating each other's durations.
#[derive(Clone, Copy, Debug)]
pub struct StartTime(Instant);

impl StartTime {
    /// Returns `cx` with the current instant stamped into it.
    pub fn attach(cx: &Context) -> Context {
        cx.with_value(StartTime(Instant::now()))
    }

    /// Elapsed time since the stamp in `cx`.
    ///
    /// A context without a stamp yields a zero duration rather than an
    /// error; the post-hook records it and moves on.
    pub fn elapsed(cx: &Context) -> Duration {
        cx.get::<StartTime>()
            .map(|stamp| stamp.0.elapsed())
            .unwrap_or_default()
    }

    /// Elapsed milliseconds since the stamp in `cx`, for duration
    /// histograms recorded in `ms`.
    pub fn elapsed_millis(cx: &Context) -> f64 {
        Self::elapsed(cx).as_secs_f64() * 1_000.0
    }
}
