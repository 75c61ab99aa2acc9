//! Pipeline error types.

use thiserror::Error;

use vgen_media::MediaError;
use vgen_models::FailureKind;
use vgen_providers::ProviderError;
use vgen_queue::QueueError;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Missing provider credentials or model settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Not enough material: need {required:.1}s, found {available:.1}s")]
    ResourceInsufficient { required: f64, available: f64 },

    #[error("Encoding failed: {0}")]
    Encoding(String),

    #[error("Subtitle alignment failed: {0}")]
    Alignment(String),

    #[error("Task cancelled")]
    Cancelled,

    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self::Encoding(msg.into())
    }

    /// Failure category recorded on the task.
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Configuration(_) => FailureKind::Configuration,
            PipelineError::Provider(ProviderError::Configuration(_)) => FailureKind::Configuration,
            PipelineError::Provider(_) => FailureKind::Provider,
            PipelineError::ResourceInsufficient { .. } => FailureKind::ResourceInsufficient,
            PipelineError::Encoding(_) => FailureKind::Encoding,
            PipelineError::Alignment(_) => FailureKind::Alignment,
            PipelineError::Cancelled => FailureKind::Cancelled,
            PipelineError::Media(MediaError::Cancelled) => FailureKind::Cancelled,
            PipelineError::Media(MediaError::AlignmentMismatch { .. }) => FailureKind::Alignment,
            PipelineError::Media(e) if e.is_encoding() => FailureKind::Encoding,
            PipelineError::Media(MediaError::DownloadFailed { .. }) => FailureKind::Provider,
            PipelineError::Media(_) => FailureKind::Internal,
            PipelineError::Queue(_) | PipelineError::Json(_) | PipelineError::Io(_) => {
                FailureKind::Internal
            }
        }
    }

    /// Check if the failed operation may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Provider(e) => e.is_retryable(),
            PipelineError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(
            PipelineError::from(ProviderError::configuration("no key")).kind(),
            FailureKind::Configuration
        );
        assert_eq!(
            PipelineError::from(ProviderError::request_failed("503")).kind(),
            FailureKind::Provider
        );
        assert_eq!(
            PipelineError::ResourceInsufficient {
                required: 30.0,
                available: 12.0
            }
            .kind(),
            FailureKind::ResourceInsufficient
        );
        assert_eq!(
            PipelineError::from(MediaError::NoSegments("none".into())).kind(),
            FailureKind::Encoding
        );
        assert_eq!(
            PipelineError::from(MediaError::AlignmentMismatch {
                expected: 3,
                matched: 1
            })
            .kind(),
            FailureKind::Alignment
        );
        assert!(PipelineError::from(MediaError::Cancelled).is_cancelled());
    }

    #[test]
    fn test_retryable() {
        assert!(PipelineError::from(ProviderError::request_failed("timeout")).is_retryable());
        assert!(!PipelineError::from(ProviderError::configuration("no model")).is_retryable());
        assert!(!PipelineError::encoding("ffmpeg exited 1").is_retryable());
    }

    #[test]
    fn test_insufficient_message() {
        let err = PipelineError::ResourceInsufficient {
            required: 30.0,
            available: 12.3,
        };
        assert_eq!(err.to_string(), "Not enough material: need 30.0s, found 12.3s");
    }
}
