//! Metric instrument factories for renderq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments come from the [`super::INSTRUMENTATION_NAME`] meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for renderq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter(super::INSTRUMENTATION_NAME)
}

/// Counter: jobs admitted to a worker pool.
/// Labels: `class`.
pub fn jobs_admitted() -> Counter<u64> {
    meter()
        .u64_counter("renderq.jobs.admitted")
        .with_description("Number of jobs admitted to a worker pool")
        .build()
}

/// Counter: fetched jobs the pool refused (token held or pool full).
/// Labels: `class`.
pub fn jobs_rejected() -> Counter<u64> {
    meter()
        .u64_counter("renderq.jobs.rejected")
        .with_description("Number of fetched jobs not admitted")
        .build()
}

/// Counter: jobs that finished processing.
/// Labels: `class`, `outcome` ("done" | "error").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("renderq.jobs.finished")
        .with_description("Number of jobs that finished processing")
        .build()
}

/// Counter: processing attempts, retries included.
/// Labels: `class`.
pub fn job_attempts() -> Counter<u64> {
    meter()
        .u64_counter("renderq.jobs.attempts")
        .with_description("Number of processing attempts")
        .build()
}

/// Histogram: eligible queued jobs seen by a poll.
/// Labels: `class`.
pub fn poll_backlog() -> Histogram<u64> {
    meter()
        .u64_histogram("renderq.poll.backlog")
        .with_description("Eligible queued jobs per poll")
        .build()
}

/// Counter: jobs whose artifacts the sweeper removed.
/// Labels: `class`.
pub fn sweep_cleaned() -> Counter<u64> {
    meter()
        .u64_counter("renderq.sweep.cleaned")
        .with_description("Number of jobs whose artifacts were deleted")
        .build()
}

/// Counter: failed work store operations.
/// Labels: `class`, `operation`.
pub fn store_errors() -> Counter<u64> {
    meter()
        .u64_counter("renderq.store.errors")
        .with_description("Number of failed work store operations")
        .build()
}

/// Histogram: job duration in milliseconds, retries included.
/// Labels: `class`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("renderq.job.duration_ms")
        .with_description("Job duration in milliseconds")
        .with_unit("ms")
        .build()
}
