//! Task submission and admission.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};

use vgen_models::{FailureKind, Stage, TaskId, TaskRecord, VideoParams};
use vgen_queue::{GenerateVideoJob, QueueBackend, StateStore, TaskManager};

use crate::error::PipelineResult;
use crate::handler::PipelineHandler;
use crate::metrics;
use crate::pipeline::Pipeline;

/// Accepts generation requests and runs them under the concurrency limit.
#[derive(Clone)]
pub struct Worker {
    manager: TaskManager,
    store: Arc<dyn StateStore>,
}

impl Worker {
    pub fn new(pipeline: Arc<Pipeline>, backend: Arc<dyn QueueBackend>) -> Self {
        let max_concurrent = pipeline.config().max_concurrent_jobs;
        let store = pipeline.store().clone();
        let handler = Arc::new(PipelineHandler::new(pipeline));
        Self {
            manager: TaskManager::new(backend, handler, max_concurrent),
            store,
        }
    }

    /// Record a new task and hand it to the manager.
    ///
    /// The task is queryable as `Processing` from the moment this returns.
    pub async fn submit(
        &self,
        params: VideoParams,
        stop_at: Option<Stage>,
    ) -> PipelineResult<TaskId> {
        let mut job = GenerateVideoJob::new(params);
        if let Some(stage) = stop_at {
            job = job.with_stop_at(stage);
        }
        self.submit_job(job).await
    }

    /// Like [`Worker::submit`], for a job built by the caller.
    ///
    /// If the job cannot be queued its record is marked failed before the
    /// error is returned.
    pub async fn submit_job(&self, job: GenerateVideoJob) -> PipelineResult<TaskId> {
        let task_id = job.task_id.clone();
        let mut record = TaskRecord::new(task_id.clone());
        self.store.set(&record).await?;

        if let Err(e) = self.manager.submit(job).await {
            record.fail(
                Stage::Script,
                FailureKind::Internal,
                format!("Failed to queue task: {}", e),
            );
            metrics::record_task_failed(Stage::Script, FailureKind::Internal);
            if let Err(store_err) = self.store.set(&record).await {
                warn!(task_id = %task_id, "Failed to persist rejected task: {}", store_err);
            }
            return Err(e.into());
        }
        metrics::record_task_submitted();
        info!(task_id = %task_id, "Task submitted");
        Ok(task_id)
    }

    pub async fn status(&self, task_id: &TaskId) -> PipelineResult<Option<TaskRecord>> {
        Ok(self.store.get(task_id).await?)
    }

    /// Cancel a running or waiting task.
    pub async fn cancel(&self, task_id: &TaskId) -> bool {
        self.manager.cancel(task_id).await
    }

    pub async fn wait_idle(&self) {
        self.manager.wait_idle().await
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    /// Admit jobs pushed by other nodes until `shutdown` flips.
    pub async fn run(&self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Worker polling every {:?} with {} max concurrent jobs",
            poll_interval,
            self.manager.max_concurrent()
        );
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    match self.manager.pump().await {
                        Ok(0) => {}
                        Ok(n) => info!("Admitted {} queued job(s)", n),
                        Err(e) => warn!("Failed to admit queued jobs: {}", e),
                    }
                }
            }
        }
        info!("Worker stopped polling");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Semaphore;
    use vgen_models::TaskState;
    use vgen_queue::{MemoryQueue, QueueError, QueueResult, QueuedJob};

    use crate::testing::*;

    #[tokio::test]
    async fn test_submit_and_wait() {
        let h = harness(None, footage(4, 5.0));
        let worker = Worker::new(h.pipeline.clone(), Arc::new(MemoryQueue::new()));

        let first = worker.submit(params(), None).await.unwrap();
        let second = worker.submit(params(), Some(Stage::Audio)).await.unwrap();
        let third = worker.submit(params(), None).await.unwrap();
        worker.wait_idle().await;

        for id in [&first, &second, &third] {
            let record = worker.status(id).await.unwrap().unwrap();
            assert_eq!(record.state, TaskState::Complete);
            assert_eq!(record.progress, 100);
        }
        let partial = worker.status(&second).await.unwrap().unwrap();
        assert!(partial.outputs.videos.is_empty());
    }

    #[tokio::test]
    async fn test_submitted_task_is_visible() {
        let h = harness(None, footage(1, 5.0));
        let worker = Worker::new(h.pipeline.clone(), Arc::new(MemoryQueue::new()));

        let id = tokio_test::assert_ok!(worker.submit(params(), None).await);
        let status = tokio_test::assert_ok!(worker.status(&id).await);
        assert!(status.is_some());
        worker.wait_idle().await;
    }

    /// A queue whose writes always fail.
    struct UnavailableQueue;

    #[async_trait]
    impl QueueBackend for UnavailableQueue {
        async fn enqueue(&self, _job: &QueuedJob) -> QueueResult<()> {
            Err(QueueError::enqueue_failed("connection refused"))
        }

        async fn dequeue(&self) -> QueueResult<Option<QueuedJob>> {
            Ok(None)
        }

        async fn len(&self) -> QueueResult<usize> {
            Ok(0)
        }

        async fn contains(&self, _task_id: &TaskId) -> QueueResult<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_failed_enqueue_marks_task_failed() {
        let gate = Arc::new(Semaphore::new(0));
        let speech = FakeSpeech {
            gate: Some(gate.clone()),
        };
        let h = harness_with_speech(None, footage(1, 5.0), speech);
        let worker = Worker::new(h.pipeline.clone(), Arc::new(UnavailableQueue));

        // Occupy every slot so the next job has to be queued
        for _ in 0..worker.manager().max_concurrent() {
            worker.submit(params(), None).await.unwrap();
        }
        let job = GenerateVideoJob::new(params()).with_task_id(TaskId::from_string("rejected"));
        let result = worker.submit_job(job).await;

        assert!(result.is_err());
        let record = worker
            .status(&TaskId::from_string("rejected"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TaskState::Failed);
        assert_eq!(record.failure.unwrap().kind, FailureKind::Internal);

        gate.add_permits(worker.manager().max_concurrent());
        worker.wait_idle().await;
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(None, Vec::new());
        let worker = Worker::new(h.pipeline.clone(), Arc::new(MemoryQueue::new()));
        let (tx, rx) = watch::channel(false);

        let polling = {
            let worker = worker.clone();
            tokio::spawn(async move { worker.run(Duration::from_millis(5), rx).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), polling)
            .await
            .unwrap()
            .unwrap();
    }
}
