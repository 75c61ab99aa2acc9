//! Shared data models for the video generation pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Task records, stage outputs and failure reasons
//! - Pipeline stages
//! - Materials, segments, speech timing and subtitles
//! - Generation parameters and encoding configuration

pub mod encoding;
pub mod material;
pub mod params;
pub mod stage;
pub mod task;
pub mod timing;

// Re-export common types
pub use encoding::EncodingConfig;
pub use material::{MaterialInfo, VideoSegment};
pub use params::{
    BgmType, ConcatMode, SubtitlePosition, TermsInput, TransitionMode, VideoAspect, VideoParams,
    VideoSource,
};
pub use stage::{ParseStageError, Stage};
pub use task::{FailureKind, StageOutputs, TaskFailure, TaskId, TaskRecord, TaskState};
pub use timing::{SubtitleItem, TimingEntry, TICKS_PER_SECOND};
