//! Shared fakes for integration tests: an in-memory job store, a manual
//! clock, a scriptable processor and renderer.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use futures::StreamExt;
use parking_lot::Mutex;
use renderq::clock::Clock;
use renderq::error::{Error, Result};
use renderq::model::{Job, JobId};
use renderq::processor::Processor;
use renderq::renderer::{Rendered, Renderer};
use renderq::store::{ClaimQuery, JobStore, Page, SweepQuery};
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::Semaphore;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Job store backed by a vector, applying the same eligibility predicates as
/// the SQL views.
pub struct MemoryStore<J> {
    jobs: Mutex<Vec<J>>,
    pub claim_calls: AtomicUsize,
    pub sweep_calls: AtomicUsize,
    pub fail_fetch: AtomicBool,
    pub fail_write_back: AtomicBool,
    pub fail_mark_deleted: AtomicBool,
}

impl<J: Job> Default for MemoryStore<J> {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            claim_calls: AtomicUsize::new(0),
            sweep_calls: AtomicUsize::new(0),
            fail_fetch: AtomicBool::new(false),
            fail_write_back: AtomicBool::new(false),
            fail_mark_deleted: AtomicBool::new(false),
        }
    }
}

impl<J: Job> MemoryStore<J> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, job: J) {
        self.jobs.lock().push(job);
    }

    pub fn get(&self, id: JobId) -> J {
        self.jobs
            .lock()
            .iter()
            .find(|j| j.id() == id)
            .cloned()
            .unwrap_or_else(|| panic!("job {id} not in store"))
    }

    pub fn claim_calls(&self) -> usize {
        self.claim_calls.load(Ordering::SeqCst)
    }

    pub fn sweep_calls(&self) -> usize {
        self.sweep_calls.load(Ordering::SeqCst)
    }

    fn update(&self, id: JobId, f: impl FnOnce(&mut J) -> Result<()>) -> Result<()> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id() == id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        f(job)
    }
}

#[async_trait]
impl<J: Job> JobStore for MemoryStore<J> {
    type Job = J;

    async fn fetch_claimable(&self, query: &ClaimQuery) -> Result<Page<J>> {
        self.claim_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".to_string()));
        }
        let mut eligible: Vec<J> = self
            .jobs
            .lock()
            .iter()
            .filter(|j| query.matches(*j))
            .cloned()
            .collect();
        eligible.sort_by(|a, b| b.lifecycle().created_at.cmp(&a.lifecycle().created_at));
        let total = eligible.len() as i64;
        eligible.truncate(query.limit);
        Ok(Page {
            items: eligible,
            total,
        })
    }

    async fn mark_done(&self, id: JobId, at: DateTime<Utc>) -> Result<()> {
        if self.fail_write_back.load(Ordering::SeqCst) {
            return Err(Error::Other("write-back refused".to_string()));
        }
        self.update(id, |j| j.lifecycle_mut().complete(at))
    }

    async fn mark_error(&self, id: JobId, error: &str) -> Result<()> {
        if self.fail_write_back.load(Ordering::SeqCst) {
            return Err(Error::Other("write-back refused".to_string()));
        }
        self.update(id, |j| j.lifecycle_mut().fail(error))
    }

    async fn fetch_sweepable(&self, query: &SweepQuery) -> Result<Page<J>> {
        self.sweep_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(Error::Other("store unavailable".to_string()));
        }
        let mut eligible: Vec<J> = self
            .jobs
            .lock()
            .iter()
            .filter(|j| query.matches(*j))
            .cloned()
            .collect();
        let total = eligible.len() as i64;
        eligible.truncate(query.limit);
        Ok(Page {
            items: eligible,
            total,
        })
    }

    async fn mark_deleted(&self, id: JobId) -> Result<()> {
        if self.fail_mark_deleted.load(Ordering::SeqCst) {
            return Err(Error::Other("mark deleted refused".to_string()));
        }
        self.update(id, |j| {
            j.lifecycle_mut().mark_deleted();
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: TimeDelta) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

// ---------------------------------------------------------------------------
// Processor
// ---------------------------------------------------------------------------

/// Processor whose behaviour is set up per test.
pub struct TestProcessor<J> {
    /// Attempts that fail before the job starts succeeding. `u32::MAX` means
    /// always fail.
    fail_first: u32,
    message: String,
    /// When set, every call waits for a permit before returning.
    gate: Option<Arc<Semaphore>>,
    attempts: Mutex<HashMap<JobId, u32>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    _job: PhantomData<fn() -> J>,
}

impl<J: Job> TestProcessor<J> {
    pub fn succeeding() -> Self {
        Self::failing_first(0, "")
    }

    pub fn always_failing(message: impl Into<String>) -> Self {
        Self::failing_first(u32::MAX, message)
    }

    pub fn failing_first(n: u32, message: impl Into<String>) -> Self {
        Self {
            fail_first: n,
            message: message.into(),
            gate: None,
            attempts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            _job: PhantomData,
        }
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn attempts(&self, id: JobId) -> u32 {
        self.attempts.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<J: Job> Processor for TestProcessor<J> {
    type Job = J;

    async fn process(&self, job: &J) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut attempts = self.attempts.lock();
            let n = attempts.entry(job.id()).or_insert(0);
            *n += 1;
            *n
        };
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        self.active.fetch_sub(1, Ordering::SeqCst);
        if attempt <= self.fail_first {
            return Err(Error::Other(self.message.clone()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renderer that echoes the upload behind a fixed prefix, or fails.
pub struct FakeRenderer {
    fail_first: usize,
    calls: AtomicUsize,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(n: usize) -> Self {
        Self {
            fail_first: n,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn render(&self, _file_name: &str, mut source: tokio::fs::File) -> Result<Rendered> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.fail_first {
            return Err(Error::Processing {
                phase: "render",
                message: "renderer responded with status 503".to_string(),
            });
        }
        let mut body = Vec::new();
        source.read_to_end(&mut body).await?;
        let chunks = vec![
            Ok(Bytes::from_static(b"%PDF-")),
            Ok(Bytes::from(body)),
        ];
        Ok(futures::stream::iter(chunks).boxed())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Poll `check` until it holds, failing the test after `within`.
pub async fn eventually<F, Fut>(within: Duration, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {within:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
