//! Task records persisted to the state store.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::{MaterialInfo, Stage};

/// Unique identifier for a generation task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generate a new random task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Task is queued or running a stage
    #[default]
    Processing,
    /// All requested stages finished
    Complete,
    /// A stage failed fatally
    Failed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Processing => "processing",
            TaskState::Complete => "complete",
            TaskState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Complete | TaskState::Failed)
    }
}

/// Category of a fatal task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Provider,
    ResourceInsufficient,
    Encoding,
    Alignment,
    Cancelled,
    Internal,
}

/// Why and where a task failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

/// Outputs produced so far, one field per stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StageOutputs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,

    #[serde(default)]
    pub terms: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<PathBuf>,

    /// Narration length in whole seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_duration: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtitle_path: Option<PathBuf>,

    #[serde(default)]
    pub materials: Vec<MaterialInfo>,

    #[serde(default)]
    pub combined_videos: Vec<PathBuf>,

    #[serde(default)]
    pub videos: Vec<PathBuf>,
}

/// Persisted state of one generation task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TaskRecord {
    pub id: TaskId,

    #[serde(default)]
    pub state: TaskState,

    /// Progress (0-100), never decreases within a run
    #[serde(default)]
    pub progress: u8,

    #[serde(default)]
    pub outputs: StageOutputs,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<TaskFailure>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a fresh processing record.
    pub fn new(id: TaskId) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: TaskState::Processing,
            progress: 0,
            outputs: StageOutputs::default(),
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Raise progress. Lower values are ignored and values above 100 are capped.
    pub fn set_progress(&mut self, progress: u8) {
        self.progress = self.progress.max(progress.min(100));
        self.updated_at = Utc::now();
    }

    /// Mark the task complete.
    pub fn complete(&mut self) {
        self.state = TaskState::Complete;
        self.set_progress(100);
    }

    /// Mark the task failed, keeping whatever outputs were already produced.
    pub fn fail(&mut self, stage: Stage, kind: FailureKind, message: impl Into<String>) {
        self.state = TaskState::Failed;
        self.failure = Some(TaskFailure {
            stage,
            kind,
            message: message.into(),
        });
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display() {
        let id = TaskId::from_string("task-1");
        assert_eq!(id.to_string(), "task-1");
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_progress_is_monotonic_and_capped() {
        let mut record = TaskRecord::new(TaskId::new());
        record.set_progress(30);
        record.set_progress(20);
        assert_eq!(record.progress, 30);
        record.set_progress(250);
        assert_eq!(record.progress, 100);
    }

    #[test]
    fn test_fail_keeps_outputs() {
        let mut record = TaskRecord::new(TaskId::new());
        record.outputs.script = Some("hello".to_string());
        record.set_progress(10);
        record.fail(Stage::Audio, FailureKind::Provider, "tts down");

        assert_eq!(record.state, TaskState::Failed);
        assert!(record.state.is_terminal());
        assert_eq!(record.outputs.script.as_deref(), Some("hello"));
        assert_eq!(record.progress, 10);
        let failure = record.failure.unwrap();
        assert_eq!(failure.stage, Stage::Audio);
        assert_eq!(failure.kind, FailureKind::Provider);
    }

    #[test]
    fn test_record_roundtrip_preserves_materials() {
        let mut record = TaskRecord::new(TaskId::from_string("abc"));
        record.outputs.terms = vec!["ocean".to_string(), "sunset".to_string()];
        record.outputs.audio_duration = Some(12.0);
        record.outputs.materials = vec![
            MaterialInfo::remote("pexels", "https://example.com/a.mp4", 8.0)
                .with_search_term("ocean")
                .with_local_path("/tmp/cache/vid-a.mp4"),
            MaterialInfo::remote("pixabay", "https://example.com/b.mp4", 15.0),
        ];
        record.outputs.videos = vec![PathBuf::from("/tmp/tasks/abc/final-1.mp4")];
        record.complete();

        let json = serde_json::to_string(&record).unwrap();
        let back: TaskRecord = serde_json::from_str(&json).unwrap();

        assert_eq!(back, record);
        assert_eq!(back.outputs.materials.len(), 2);
        assert_eq!(back.state, TaskState::Complete);
    }
}
