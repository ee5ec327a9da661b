use std::error::Error;

use opentelemetry::trace::{SpanKind, SpanRef, Status};

/// Span status for an operation outcome.
///
/// A sentinel "no result" error (cache miss, record not found) is not a
/// failure: the status stays [`Status::Unset`] and the error is not
/// recorded. Successful operations also stay `Unset`.
pub fn status_for(error: Option<&dyn Error>, sentinel: bool) -> Status {
    match error {
        Some(error) if !sentinel => Status::error(error.to_string()),
        _ => Status::Unset,
    }
}

/// Post-hook half of the hook pattern: records the outcome and ends the
/// span.
///
/// The span is ended on every path through this function; callers reach it
/// exactly once per started operation.
pub fn finish_span(span: &SpanRef<'_>, error: Option<&dyn Error>, sentinel: bool) {
    if let Some(error) = error {
        if !sentinel {
            span.record_error(error);
        }
    }
    span.set_status(status_for(error, sentinel));
    span.end();
}

/// Span status for an HTTP response code.
///
/// Server spans only fail on 5xx; client spans fail on 4xx and 5xx.
/// Everything else is left [`Status::Unset`].
pub fn http_status(code: u16, kind: SpanKind) -> Status {
    let failed = match kind {
        SpanKind::Server => code >= 500,
        _ => code >= 400,
    };
    if failed {
        Status::error(format!("HTTP status code {code}"))
    } else {
        Status::Unset
    }
}
