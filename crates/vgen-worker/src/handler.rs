//! Queue job dispatch into the pipeline.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::warn;

use vgen_models::{FailureKind, Stage, TaskId, TaskRecord, TaskState};
use vgen_queue::{GenerateVideoJob, JobHandler, JobOutcome, QueuedJob, StateStore};

use crate::metrics;
use crate::pipeline::Pipeline;

/// Runs queued jobs through the pipeline.
pub struct PipelineHandler {
    pipeline: Arc<Pipeline>,
    task_timeout: Option<Duration>,
}

impl PipelineHandler {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        let task_timeout = pipeline.config().task_timeout;
        Self {
            pipeline,
            task_timeout,
        }
    }

    pub fn with_task_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.task_timeout = timeout;
        self
    }

    async fn generate_video(
        &self,
        job: GenerateVideoJob,
        cancel: watch::Receiver<bool>,
    ) -> JobOutcome {
        let cancel = match self.task_timeout {
            Some(timeout) => with_deadline(cancel, timeout, job.task_id.clone()),
            None => cancel,
        };
        let record = self.pipeline.run(&job, cancel).await;
        outcome_of(&record)
    }
}

#[async_trait]
impl JobHandler for PipelineHandler {
    async fn handle(&self, job: QueuedJob, cancel: watch::Receiver<bool>) -> JobOutcome {
        match job {
            QueuedJob::GenerateVideo(job) => self.generate_video(job, cancel).await,
        }
    }

    async fn dropped(&self, job: QueuedJob) {
        let task_id = job.task_id().clone();
        let store = self.pipeline.store();
        let mut record = match store.get(&task_id).await {
            Ok(Some(record)) => record,
            _ => TaskRecord::new(task_id.clone()),
        };
        record.fail(
            Stage::Script,
            FailureKind::Cancelled,
            "Task cancelled before it started",
        );
        metrics::record_task_failed(Stage::Script, FailureKind::Cancelled);
        if let Err(e) = store.set(&record).await {
            warn!(task_id = %task_id, "Failed to persist cancelled task: {}", e);
        }
    }
}

/// Map a finished record to the queue outcome.
pub fn outcome_of(record: &TaskRecord) -> JobOutcome {
    match (&record.state, &record.failure) {
        (TaskState::Complete, _) => JobOutcome::Succeeded,
        (_, Some(failure)) if failure.kind == FailureKind::Cancelled => JobOutcome::Cancelled,
        _ => JobOutcome::Failed,
    }
}

/// Derive a cancel flag that also flips once `timeout` has elapsed.
fn with_deadline(
    cancel: watch::Receiver<bool>,
    timeout: Duration,
    task_id: TaskId,
) -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(*cancel.borrow());
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_cancelled(cancel) => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(task_id = %task_id, "Task exceeded {:?}, cancelling", timeout);
            }
            _ = tx.closed() => return,
        }
        let _ = tx.send(true);
    });
    rx
}

/// Resolve once the flag is `true`. Never resolves if the sender goes away first.
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
