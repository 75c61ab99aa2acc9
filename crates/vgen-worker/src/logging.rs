//! Structured task logging.

use tracing::{error, info, warn, Span};
use vgen_models::{Stage, TaskId};

/// Logs task lifecycle events with the task id and current stage attached.
#[derive(Debug, Clone)]
pub struct TaskLogger {
    task_id: String,
    stage: Option<Stage>,
}

impl TaskLogger {
    pub fn new(task_id: &TaskId) -> Self {
        Self {
            task_id: task_id.to_string(),
            stage: None,
        }
    }

    /// Logger for one stage of the same task.
    pub fn for_stage(&self, stage: Stage) -> Self {
        Self {
            task_id: self.task_id.clone(),
            stage: Some(stage),
        }
    }

    fn stage_name(&self) -> &'static str {
        self.stage.map(|s| s.as_str()).unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(task_id = %self.task_id, stage = self.stage_name(), "Started: {}", message);
    }

    pub fn log_progress(&self, message: &str) {
        info!(task_id = %self.task_id, stage = self.stage_name(), "{}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(task_id = %self.task_id, stage = self.stage_name(), "{}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(task_id = %self.task_id, stage = self.stage_name(), "{}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(task_id = %self.task_id, stage = self.stage_name(), "Completed: {}", message);
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn stage(&self) -> Option<Stage> {
        self.stage
    }

    /// Span carrying the task id and stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("task", task_id = %self.task_id, stage = self.stage_name())
    }
}
