//! Job types for the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vgen_models::{Stage, TaskId, VideoParams};

/// Run the generation pipeline for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateVideoJob {
    pub task_id: TaskId,
    pub params: VideoParams,
    /// Finish successfully after this stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_at: Option<Stage>,
    pub created_at: DateTime<Utc>,
}

impl GenerateVideoJob {
    pub fn new(params: VideoParams) -> Self {
        Self {
            task_id: TaskId::new(),
            params,
            stop_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_stop_at(mut self, stage: Stage) -> Self {
        self.stop_at = Some(stage);
        self
    }
}

/// Every kind of job the manager can run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueuedJob {
    GenerateVideo(GenerateVideoJob),
}

impl QueuedJob {
    pub fn task_id(&self) -> &TaskId {
        match self {
            QueuedJob::GenerateVideo(j) => &j.task_id,
        }
    }

    /// Label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            QueuedJob::GenerateVideo(_) => "generate_video",
        }
    }
}

impl From<GenerateVideoJob> for QueuedJob {
    fn from(job: GenerateVideoJob) -> Self {
        QueuedJob::GenerateVideo(job)
    }
}
