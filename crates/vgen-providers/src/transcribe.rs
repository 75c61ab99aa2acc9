//! Speech-to-text transcription.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use vgen_media::subtitle::srt;
use vgen_models::SubtitleItem;

use crate::error::{ProviderError, ProviderResult};
use crate::process::run_tool;

const TRANSCRIBE_TIMEOUT: Duration = Duration::from_secs(1800);

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe `audio` into an SRT file at `output`.
    async fn transcribe(&self, audio: &Path, output: &Path) -> ProviderResult<Vec<SubtitleItem>>;
}

/// Transcriber backed by a whisper-compatible CLI
/// (`whisper <audio> --model M --output_format srt --output_dir D`).
#[derive(Debug, Clone)]
pub struct WhisperCliTranscriber {
    binary: String,
    model: String,
    language: Option<String>,
}

impl WhisperCliTranscriber {
    pub fn new(binary: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model: model.into(),
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    /// Where the CLI writes its SRT for `audio` inside `dir`.
    pub fn srt_path(audio: &Path, dir: &Path) -> PathBuf {
        let stem = audio
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "audio".to_string());
        dir.join(format!("{stem}.srt"))
    }

    fn args(&self, audio: &Path, dir: &Path) -> Vec<String> {
        let mut args = vec![
            audio.to_string_lossy().to_string(),
            "--model".to_string(),
            self.model.clone(),
            "--output_format".to_string(),
            "srt".to_string(),
            "--output_dir".to_string(),
            dir.to_string_lossy().to_string(),
        ];
        if let Some(language) = &self.language {
            args.push("--language".to_string());
            args.push(language.clone());
        }
        args
    }
}

#[async_trait]
impl Transcriber for WhisperCliTranscriber {
    async fn transcribe(&self, audio: &Path, output: &Path) -> ProviderResult<Vec<SubtitleItem>> {
        let dir = output.parent().unwrap_or_else(|| Path::new("."));
        info!(model = %self.model, "Transcribing {}", audio.display());

        run_tool(&self.binary, self.args(audio, dir), TRANSCRIBE_TIMEOUT).await?;

        let produced = Self::srt_path(audio, dir);
        if !produced.exists() {
            return Err(ProviderError::tool_failed(
                &self.binary,
                format!("expected {} to be written", produced.display()),
            ));
        }
        if produced != output {
            tokio::fs::rename(&produced, output).await?;
        }

        let items = srt::read_srt(output).await?;
        info!("Transcribed {} subtitle lines", items.len());
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_srt_path() {
        assert_eq!(
            WhisperCliTranscriber::srt_path(Path::new("/t/audio.mp3"), Path::new("/t")),
            PathBuf::from("/t/audio.srt")
        );
    }

    #[test]
    fn test_args_include_language() {
        let t = WhisperCliTranscriber::new("whisper", "base").with_language("en");
        let args = t.args(Path::new("/t/audio.mp3"), Path::new("/t"));
        assert_eq!(args[0], "/t/audio.mp3");
        assert!(args.windows(2).any(|w| w[0] == "--output_format" && w[1] == "srt"));
        assert_eq!(&args[args.len() - 2..], ["--language", "en"]);
    }
}
