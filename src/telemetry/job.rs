//! Job execution span helpers.
//!
//! Provides span creation and outcome recording for jobs flowing through a
//! worker pool.

use crate::model::{JobId, JobKind};
use tracing::Span;

/// Start a span for one job execution.
///
/// The `job.outcome` and `job.attempts` fields are declared empty and filled
/// in by [`record_outcome`].
pub fn start_job_span(kind: JobKind, id: JobId) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.class" = kind.as_str(),
        "job.id" = %id,
        "job.outcome" = tracing::field::Empty,
        "job.attempts" = tracing::field::Empty,
    )
}

/// Record how a job ended on its span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_outcome(span: &Span, outcome: &str, attempts: u32) {
    span.record("job.outcome", outcome);
    span.record("job.attempts", attempts);
    span.in_scope(|| {
        tracing::info!(outcome = outcome, attempts = attempts, "job_finished");
    });
}
