//! # renderq
//!
//! Scheduling core of a document conversion service.
//!
//! Uploaded documents become queued jobs in Postgres. Per job class, a poller
//! claims fresh queued jobs into a bounded worker pool that never runs the
//! same job twice at once; conversion jobs go to an external HTTP renderer
//! with retries, batch jobs zip up rendered output. A sweeper deletes the
//! artifacts of finished, failed and abandoned jobs once they age out.

pub mod artifacts;
pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod intake;
pub mod model;
pub mod processor;
pub mod renderer;
pub mod store;
pub mod telemetry;
