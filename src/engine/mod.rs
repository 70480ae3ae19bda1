//! Scheduling engine: bounded worker pools fed by store pollers, plus TTL
//! sweepers that reclaim artifacts.

pub mod poller;
pub mod pool;
pub mod retry;
pub mod sweeper;

pub use poller::{PollReport, PollSettings, Poller};
pub use pool::TaskPool;
pub use retry::RetryPolicy;
pub use sweeper::{SweepReport, SweepSettings, Sweeper};

use crate::artifacts::ArtifactStore;
use crate::clock::Clock;
use crate::processor::Processor;
use crate::store::JobStore;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Settings for one job class.
#[derive(Debug, Clone, Copy)]
pub struct ClassSettings {
    pub parallel_limit: usize,
    pub poll: PollSettings,
}

/// One job class wired up: its store, its processor and its settings.
pub struct ClassParts<S, P> {
    pub store: Arc<S>,
    pub processor: Arc<P>,
    pub settings: ClassSettings,
}

/// Everything the scheduler needs to run both job classes.
pub struct SchedulerParts<CS, CP, BS, BP> {
    pub conversions: ClassParts<CS, CP>,
    pub batches: ClassParts<BS, BP>,
    pub artifacts: ArtifactStore,
    pub clock: Arc<dyn Clock>,
    pub sweep: SweepSettings,
}

/// Runs two independent pipelines (conversion and batch), each with its own
/// pool, poller and sweeper.
pub struct Scheduler {
    conversion_pool: Arc<TaskPool>,
    batch_pool: Arc<TaskPool>,
    shutdown: CancellationToken,
    loops: Vec<JoinHandle<()>>,
}

impl Scheduler {
    /// Start both pools and all four loops.
    pub fn start<CS, CP, BS, BP>(parts: SchedulerParts<CS, CP, BS, BP>) -> Self
    where
        CS: JobStore,
        CP: Processor<Job = CS::Job>,
        BS: JobStore,
        BP: Processor<Job = BS::Job>,
    {
        let SchedulerParts {
            conversions,
            batches,
            artifacts,
            clock,
            sweep,
        } = parts;

        // Pools get their own tokens: stopping the loops must not cancel work
        // that is already running.
        let conversion_pool = Arc::new(TaskPool::new(
            conversions.settings.parallel_limit,
            CancellationToken::new(),
        ));
        let batch_pool = Arc::new(TaskPool::new(
            batches.settings.parallel_limit,
            CancellationToken::new(),
        ));
        conversion_pool.start();
        batch_pool.start();

        let shutdown = CancellationToken::new();
        let loops = vec![
            tokio::spawn(
                Sweeper::new(
                    Arc::clone(&conversions.store),
                    artifacts.clone(),
                    Arc::clone(&clock),
                    sweep,
                )
                .run(shutdown.clone()),
            ),
            tokio::spawn(
                Sweeper::new(
                    Arc::clone(&batches.store),
                    artifacts,
                    Arc::clone(&clock),
                    sweep,
                )
                .run(shutdown.clone()),
            ),
            tokio::spawn(
                Poller::new(
                    conversions.store,
                    conversions.processor,
                    Arc::clone(&conversion_pool),
                    Arc::clone(&clock),
                    conversions.settings.poll,
                )
                .run(shutdown.clone()),
            ),
            tokio::spawn(
                Poller::new(
                    batches.store,
                    batches.processor,
                    Arc::clone(&batch_pool),
                    clock,
                    batches.settings.poll,
                )
                .run(shutdown.clone()),
            ),
        ];

        info!(
            conversion_limit = conversion_pool.capacity(),
            batch_limit = batch_pool.capacity(),
            "scheduler started"
        );
        Self {
            conversion_pool,
            batch_pool,
            shutdown,
            loops,
        }
    }

    pub fn conversion_pool(&self) -> &Arc<TaskPool> {
        &self.conversion_pool
    }

    pub fn batch_pool(&self) -> &Arc<TaskPool> {
        &self.batch_pool
    }

    /// Stop the loops, then the pools. Running jobs finish first; queued
    /// tasks are dropped and their jobs stay `queued` in the store.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        for result in futures::future::join_all(self.loops).await {
            if let Err(e) = result {
                error!("scheduler loop exited abnormally: {e}");
            }
        }
        self.conversion_pool.stop().await;
        self.batch_pool.stop().await;
        info!("scheduler stopped");
    }
}
