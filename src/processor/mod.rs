//! Job processors: the work a pool runs for one job.

pub mod batch;
pub mod convert;

pub use batch::BatchProcessor;
pub use convert::ConvertProcessor;

use crate::error::Result;
use crate::model::Job;
use async_trait::async_trait;

/// Performs the work for one job of a class.
///
/// A processor only produces artifacts; the poller owns every status change.
/// It may be called again for the same job after a failed attempt, so a
/// partial result from an earlier attempt must be overwritten.
#[async_trait]
pub trait Processor: Send + Sync + 'static {
    type Job: Job;

    async fn process(&self, job: &Self::Job) -> Result<()>;
}
