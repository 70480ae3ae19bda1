//! Bounded worker pool with token-based admission.
//!
//! Every admitted task carries a token (a job id). The token set is the single
//! source of truth for "someone in this process already holds this job": a
//! token enters the set in the same critical section that enqueues its task,
//! and leaves it when a worker has finished running that task, whether the
//! task returned or panicked.

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::model::JobId;

type TaskFn = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

struct Admitted<T> {
    token: T,
    task: TaskFn,
}

/// Everything guarded by the pool's single mutex.
struct Admission<T> {
    /// `None` once the pool is stopped.
    sender: Option<mpsc::Sender<Admitted<T>>>,
    /// Tokens admitted or running.
    tokens: HashSet<T>,
}

/// A fixed set of workers draining a bounded queue of token-tagged tasks.
pub struct TaskPool<T = JobId> {
    capacity: usize,
    admission: Arc<Mutex<Admission<T>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Admitted<T>>>>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T> TaskPool<T>
where
    T: Eq + Hash + Clone + Display + Send + 'static,
{
    /// Create a pool of `capacity` workers. Workers do not run until
    /// [`start`](Self::start); tasks admitted before that simply wait.
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            capacity,
            admission: Arc::new(Mutex::new(Admission {
                sender: Some(sender),
                tokens: HashSet::with_capacity(capacity),
            })),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            cancel,
            workers: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Admit `task` under `token`.
    ///
    /// Returns `false`, with no side effect, when the token is already held,
    /// when every slot is taken, or when the pool has been stopped.
    pub fn add_task<F, Fut>(&self, token: T, task: F) -> bool
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut admission = self.admission.lock();
        if admission.tokens.contains(&token) || admission.tokens.len() >= self.capacity {
            return false;
        }
        let Some(sender) = admission.sender.as_ref() else {
            return false;
        };

        let admitted = Admitted {
            token: token.clone(),
            task: Box::new(move |cancel| task(cancel).boxed()),
        };
        if sender.try_send(admitted).is_err() {
            return false;
        }
        admission.tokens.insert(token);
        true
    }

    /// Free slots: capacity minus tokens admitted or running. Zero once stopped.
    pub fn left_slots(&self) -> usize {
        let admission = self.admission.lock();
        if admission.sender.is_none() {
            return 0;
        }
        self.capacity.saturating_sub(admission.tokens.len())
    }

    /// Snapshot of tokens admitted or running.
    pub fn occupied_tokens(&self) -> HashSet<T> {
        self.admission.lock().tokens.clone()
    }

    pub fn is_occupied(&self, token: &T) -> bool {
        self.admission.lock().tokens.contains(token)
    }

    /// Spawn the workers. Calling it again while they run does nothing.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        for worker_id in 0..self.capacity {
            workers.push(tokio::spawn(worker_loop(
                worker_id,
                Arc::clone(&self.receiver),
                Arc::clone(&self.admission),
                self.cancel.clone(),
            )));
        }
        info!(capacity = self.capacity, "worker pool started");
    }

    /// Close admission, signal cancellation and wait for every worker to exit.
    ///
    /// Tasks already running are not interrupted; they see the cancelled token
    /// and may wind down early on their own. Tasks still queued are dropped.
    pub async fn stop(&self) {
        self.admission.lock().sender.take();
        self.cancel.cancel();

        let workers = std::mem::take(&mut *self.workers.lock());
        for handle in workers {
            if let Err(e) = handle.await {
                error!("worker exited abnormally: {e}");
            }
        }
        self.admission.lock().tokens.clear();
        info!(capacity = self.capacity, "worker pool stopped");
    }
}

async fn worker_loop<T>(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Admitted<T>>>>,
    admission: Arc<Mutex<Admission<T>>>,
    cancel: CancellationToken,
) where
    T: Eq + Hash + Display + Send + 'static,
{
    debug!(worker_id, "worker started");

    loop {
        // Cancellation is only observed between tasks.
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            admitted = async { receiver.lock().await.recv().await } => admitted,
        };
        let Some(Admitted { token, task }) = next else {
            break;
        };

        if AssertUnwindSafe(task(cancel.clone()))
            .catch_unwind()
            .await
            .is_err()
        {
            error!(worker_id, token = %token, "task panicked");
        }

        admission.lock().tokens.remove(&token);
    }

    debug!(worker_id, "worker stopped");
}
