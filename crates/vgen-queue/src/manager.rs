//! Bounded-concurrency task manager.
//!
//! Jobs start immediately while fewer than `max_concurrent` are running and
//! wait in the FIFO backend otherwise. Whenever a job finishes, waiting jobs
//! are admitted until the limit is reached again.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, error, info, warn, Instrument};

use vgen_models::TaskId;

use crate::backend::QueueBackend;
use crate::error::QueueResult;
use crate::job::QueuedJob;

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl JobOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Succeeded => "succeeded",
            JobOutcome::Failed => "failed",
            JobOutcome::Cancelled => "cancelled",
        }
    }
}

/// Executes admitted jobs.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    /// Run `job` to completion. `cancel` flips to `true` when the job is cancelled.
    async fn handle(&self, job: QueuedJob, cancel: watch::Receiver<bool>) -> JobOutcome;

    /// Called instead of `handle` for a job cancelled while it was waiting.
    async fn dropped(&self, _job: QueuedJob) {}
}

/// A running job, keyed by its admission slot.
struct RunningJob {
    task_id: TaskId,
    cancel: watch::Sender<bool>,
}

type Running = HashMap<u64, RunningJob>;

struct Inner {
    backend: Arc<dyn QueueBackend>,
    handler: Arc<dyn JobHandler>,
    max_concurrent: usize,
    /// Running jobs by slot. A task id may appear twice if it was submitted twice.
    running: Mutex<Running>,
    next_slot: AtomicU64,
    /// Waiting jobs to drop when they reach the head of the queue
    cancelled: Mutex<HashSet<TaskId>>,
    idle: Notify,
}

/// Admits jobs from a queue backend under a concurrency limit.
#[derive(Clone)]
pub struct TaskManager {
    inner: Arc<Inner>,
}

impl TaskManager {
    pub fn new(
        backend: Arc<dyn QueueBackend>,
        handler: Arc<dyn JobHandler>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                handler,
                max_concurrent: max_concurrent.max(1),
                running: Mutex::new(HashMap::new()),
                next_slot: AtomicU64::new(0),
                cancelled: Mutex::new(HashSet::new()),
                idle: Notify::new(),
            }),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.inner.max_concurrent
    }

    /// Start `job` now if a slot is free, otherwise queue it.
    pub async fn submit(&self, job: impl Into<QueuedJob>) -> QueueResult<()> {
        let job = job.into();
        let mut running = self.inner.running.lock().await;

        if running.len() < self.inner.max_concurrent {
            start(&self.inner, &mut running, job);
        } else {
            self.inner.backend.enqueue(&job).await?;
            let queued = self.inner.backend.len().await.unwrap_or_default();
            metrics::gauge!("vgen_queue_length").set(queued as f64);
            info!(
                task_id = %job.task_id(),
                running = running.len(),
                queued,
                "All slots busy, job queued"
            );
        }
        Ok(())
    }

    /// Admit waiting jobs while slots are free. Returns how many started.
    ///
    /// Needed when other nodes push to a shared backend.
    pub async fn pump(&self) -> QueueResult<usize> {
        let mut running = self.inner.running.lock().await;
        admit(&self.inner, &mut running).await
    }

    /// Cancel a task.
    ///
    /// A running task is signalled and `true` is returned. A waiting task is
    /// remembered and dropped when it is dequeued. Unknown or finished ids are
    /// ignored.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        // Held across the backend check so this manager cannot admit in between
        let running = self.inner.running.lock().await;
        let mut signalled = false;
        for job in running.values().filter(|j| &j.task_id == task_id) {
            let _ = job.cancel.send(true);
            signalled = true;
        }
        if signalled {
            info!(task_id = %task_id, "Cancelling running task");
            return true;
        }

        match self.inner.backend.contains(task_id).await {
            Ok(true) => {
                debug!(task_id = %task_id, "Marking waiting task as cancelled");
                self.inner.cancelled.lock().await.insert(task_id.clone());
            }
            Ok(false) => debug!(task_id = %task_id, "Nothing to cancel"),
            Err(e) => warn!(task_id = %task_id, "Failed to look up waiting task: {}", e),
        }
        false
    }

    pub async fn running_count(&self) -> usize {
        self.inner.running.lock().await.len()
    }

    pub async fn is_running(&self, task_id: &TaskId) -> bool {
        self.inner
            .running
            .lock()
            .await
            .values()
            .any(|j| &j.task_id == task_id)
    }

    pub async fn queued_len(&self) -> QueueResult<usize> {
        self.inner.backend.len().await
    }

    /// Wait until nothing is running and nothing is waiting.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.inner.idle.notified();
            let running = self.running_count().await;
            let queued = self.queued_len().await.unwrap_or_default();
            if running == 0 && queued == 0 {
                return;
            }
            if running == 0 {
                // Jobs pushed by another node; admit them here
                if let Err(e) = self.pump().await {
                    warn!("Failed to admit queued jobs: {}", e);
                    return;
                }
                continue;
            }
            notified.await;
        }
    }
}

/// Register and spawn a job. The caller holds the running lock.
fn start(inner: &Arc<Inner>, running: &mut Running, job: QueuedJob) {
    let task_id = job.task_id().clone();
    let slot = inner.next_slot.fetch_add(1, Ordering::Relaxed);
    let (cancel_tx, cancel_rx) = watch::channel(false);
    if running.values().any(|j| j.task_id == task_id) {
        warn!(task_id = %task_id, "Task id is already running");
    }
    running.insert(
        slot,
        RunningJob {
            task_id: task_id.clone(),
            cancel: cancel_tx,
        },
    );
    metrics::gauge!("vgen_jobs_running").set(running.len() as f64);
    info!(
        task_id = %task_id,
        kind = job.kind(),
        running = running.len(),
        "Starting job"
    );

    let inner = Arc::clone(inner);
    let span = tracing::info_span!("job", task_id = %task_id, kind = job.kind());
    tokio::spawn(
        async move {
            let handler = Arc::clone(&inner.handler);
            let outcome = match tokio::spawn(async move { handler.handle(job, cancel_rx).await }).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Job panicked: {}", e);
                    JobOutcome::Failed
                }
            };
            metrics::counter!("vgen_jobs_finished_total", "outcome" => outcome.as_str()).increment(1);
            finish(inner, slot, task_id, outcome).await;
        }
        .instrument(span),
    );
}

/// Release the slot of a finished job and admit waiting ones.
async fn finish(inner: Arc<Inner>, slot: u64, task_id: TaskId, outcome: JobOutcome) {
    let mut running = inner.running.lock().await;
    running.remove(&slot);
    info!(task_id = %task_id, outcome = outcome.as_str(), "Job finished");

    if let Err(e) = admit(&inner, &mut running).await {
        error!("Failed to admit queued jobs: {}", e);
    }
    metrics::gauge!("vgen_jobs_running").set(running.len() as f64);

    if running.is_empty() {
        inner.idle.notify_waiters();
    }
}

async fn admit(inner: &Arc<Inner>, running: &mut Running) -> QueueResult<usize> {
    let mut started = 0;
    while running.len() < inner.max_concurrent {
        let Some(job) = inner.backend.dequeue().await? else {
            break;
        };
        if inner.cancelled.lock().await.remove(job.task_id()) {
            info!(task_id = %job.task_id(), "Dropping cancelled job");
            metrics::counter!("vgen_jobs_finished_total", "outcome" => JobOutcome::Cancelled.as_str())
                .increment(1);
            inner.handler.dropped(job).await;
            continue;
        }
        start(inner, running, job);
        started += 1;
    }
    if started > 0 {
        let queued = inner.backend.len().await.unwrap_or_default();
        metrics::gauge!("vgen_queue_length").set(queued as f64);
    }
    Ok(started)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryQueue;
    use crate::job::GenerateVideoJob;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::{mpsc, Semaphore};
    use vgen_models::VideoParams;

    /// Blocks every job until the test hands out a permit.
    struct GatedHandler {
        gate: Semaphore,
        started: mpsc::UnboundedSender<TaskId>,
        dropped: std::sync::Mutex<Vec<TaskId>>,
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    impl GatedHandler {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TaskId>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let handler = Arc::new(Self {
                gate: Semaphore::new(0),
                started: tx,
                dropped: std::sync::Mutex::new(Vec::new()),
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            });
            (handler, rx)
        }
    }

    #[async_trait]
    impl JobHandler for GatedHandler {
        async fn handle(&self, job: QueuedJob, mut cancel: watch::Receiver<bool>) -> JobOutcome {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let _ = self.started.send(job.task_id().clone());

            let outcome = tokio::select! {
                permit = self.gate.acquire() => {
                    permit.unwrap().forget();
                    JobOutcome::Succeeded
                }
                _ = cancel.wait_for(|c| *c) => JobOutcome::Cancelled,
            };
            self.current.fetch_sub(1, Ordering::SeqCst);
            outcome
        }

        async fn dropped(&self, job: QueuedJob) {
            self.dropped.lock().unwrap().push(job.task_id().clone());
        }
    }

    fn job(id: &str) -> GenerateVideoJob {
        GenerateVideoJob::new(VideoParams::new("s")).with_task_id(TaskId::from_string(id))
    }

    async fn next_started(rx: &mut mpsc::UnboundedReceiver<TaskId>) -> String {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("job should start")
            .expect("channel open")
            .to_string()
    }

    #[tokio::test]
    async fn test_bounded_fifo_admission() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 2);

        for i in 0..6 {
            manager.submit(job(&format!("t{i}"))).await.unwrap();
        }

        assert_eq!(next_started(&mut started).await, "t0");
        assert_eq!(next_started(&mut started).await, "t1");
        assert_eq!(manager.running_count().await, 2);
        assert_eq!(manager.queued_len().await.unwrap(), 4);

        // Completing one admits exactly one
        handler.gate.add_permits(1);
        assert_eq!(next_started(&mut started).await, "t2");
        assert_eq!(manager.queued_len().await.unwrap(), 3);
        assert!(manager.running_count().await <= 2);

        handler.gate.add_permits(5);
        for expected in ["t3", "t4", "t5"] {
            assert_eq!(next_started(&mut started).await, expected);
        }

        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(manager.running_count().await, 0);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_waiting_job_is_dropped() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 1);

        manager.submit(job("a")).await.unwrap();
        manager.submit(job("b")).await.unwrap();
        manager.submit(job("c")).await.unwrap();
        assert_eq!(next_started(&mut started).await, "a");

        assert!(!manager.cancel(&TaskId::from_string("b")).await);
        handler.gate.add_permits(2);

        assert_eq!(next_started(&mut started).await, "c");
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(
            *handler.dropped.lock().unwrap(),
            vec![TaskId::from_string("b")]
        );
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 2);

        manager.submit(job("a")).await.unwrap();
        assert_eq!(next_started(&mut started).await, "a");
        assert!(manager.is_running(&TaskId::from_string("a")).await);

        assert!(manager.cancel(&TaskId::from_string("a")).await);
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_repeated_task_id_keeps_slot_accounting() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 2);

        manager.submit(job("x")).await.unwrap();
        manager.submit(job("x")).await.unwrap();
        manager.submit(job("y")).await.unwrap();
        assert_eq!(next_started(&mut started).await, "x");
        assert_eq!(next_started(&mut started).await, "x");

        assert_eq!(manager.running_count().await, 2);
        assert_eq!(manager.queued_len().await.unwrap(), 1);

        handler.gate.add_permits(1);
        assert_eq!(next_started(&mut started).await, "y");
        assert_eq!(manager.running_count().await, 2);

        handler.gate.add_permits(2);
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(manager.running_count().await, 0);
        assert_eq!(handler.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancel_signals_every_run_of_a_task_id() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 2);

        manager.submit(job("x")).await.unwrap();
        manager.submit(job("x")).await.unwrap();
        next_started(&mut started).await;
        next_started(&mut started).await;

        assert!(manager.cancel(&TaskId::from_string("x")).await);
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert_eq!(manager.running_count().await, 0);
    }

    #[tokio::test]
    async fn test_cancel_of_unknown_or_finished_id_is_not_remembered() {
        let (handler, mut started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler.clone(), 1);

        manager.submit(job("a")).await.unwrap();
        assert_eq!(next_started(&mut started).await, "a");
        handler.gate.add_permits(1);
        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();

        assert!(!manager.cancel(&TaskId::from_string("a")).await);
        assert!(!manager.cancel(&TaskId::from_string("never-submitted")).await);

        manager.submit(job("b")).await.unwrap();
        manager.submit(job("a")).await.unwrap();
        manager.submit(job("never-submitted")).await.unwrap();
        assert_eq!(next_started(&mut started).await, "b");
        handler.gate.add_permits(3);
        assert_eq!(next_started(&mut started).await, "a");
        assert_eq!(next_started(&mut started).await, "never-submitted");

        tokio::time::timeout(Duration::from_secs(5), manager.wait_idle())
            .await
            .unwrap();
        assert!(handler.dropped.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wait_idle_returns_immediately_when_empty() {
        let (handler, _started) = GatedHandler::new();
        let manager = TaskManager::new(Arc::new(MemoryQueue::new()), handler, 2);
        tokio::time::timeout(Duration::from_millis(500), manager.wait_idle())
            .await
            .unwrap();
    }
}
