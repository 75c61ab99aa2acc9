//! Speech synthesis.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use vgen_media::subtitle::srt;
use vgen_models::{TimingEntry, TICKS_PER_SECOND};

use crate::error::{ProviderError, ProviderResult};
use crate::process::run_tool;

const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(600);

/// What to say and how.
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub text: String,
    pub voice: String,
    /// Speed multiplier, 1.0 is normal
    pub rate: f64,
}

impl SpeechRequest {
    pub fn new(text: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            voice: voice.into(),
            rate: 1.0,
        }
    }

    pub fn with_rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }
}

/// Synthesized narration with per-fragment timing.
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    pub audio_file: PathBuf,
    pub timings: Vec<TimingEntry>,
}

impl SpeechOutput {
    /// Narration length in whole seconds, rounded up from the last fragment.
    pub fn duration_seconds(&self) -> f64 {
        self.timings
            .last()
            .map(|t| t.offset_end.div_ceil(TICKS_PER_SECOND) as f64)
            .unwrap_or(0.0)
    }
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Write narration for `request` to `output`.
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> ProviderResult<SpeechOutput>;
}

/// Format a speed multiplier the way edge-tts expects ("+20%", "-10%").
pub fn rate_percent(rate: f64) -> String {
    let percent = ((rate - 1.0) * 100.0).round() as i64;
    if percent >= 0 {
        format!("+{percent}%")
    } else {
        format!("{percent}%")
    }
}

/// Synthesizer backed by the `edge-tts` CLI.
#[derive(Debug, Clone)]
pub struct EdgeTtsSynthesizer {
    binary: String,
}

impl Default for EdgeTtsSynthesizer {
    fn default() -> Self {
        Self::new("edge-tts")
    }
}

impl EdgeTtsSynthesizer {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for EdgeTtsSynthesizer {
    async fn synthesize(&self, request: &SpeechRequest, output: &Path) -> ProviderResult<SpeechOutput> {
        if request.text.trim().is_empty() {
            return Err(ProviderError::invalid_response("nothing to synthesize"));
        }

        let text_file = output.with_extension("txt");
        let timing_file = output.with_extension("timing.srt");
        tokio::fs::write(&text_file, &request.text).await?;

        info!(voice = %request.voice, "Synthesizing narration to {}", output.display());
        let result = run_tool(
            &self.binary,
            [
                "--voice".into(),
                request.voice.clone(),
                format!("--rate={}", rate_percent(request.rate)),
                "--file".into(),
                text_file.to_string_lossy().to_string(),
                "--write-media".into(),
                output.to_string_lossy().to_string(),
                "--write-subtitles".into(),
                timing_file.to_string_lossy().to_string(),
            ],
            SYNTHESIS_TIMEOUT,
        )
        .await;
        let _ = tokio::fs::remove_file(&text_file).await;
        result?;

        let cues = srt::read_srt(&timing_file).await?;
        let _ = tokio::fs::remove_file(&timing_file).await;
        let timings: Vec<TimingEntry> = cues
            .into_iter()
            .map(|c| TimingEntry::from_seconds(c.text, c.start_time, c.end_time))
            .collect();

        if timings.is_empty() {
            return Err(ProviderError::invalid_response("edge-tts produced no timing"));
        }

        Ok(SpeechOutput {
            audio_file: output.to_path_buf(),
            timings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_percent() {
        assert_eq!(rate_percent(1.0), "+0%");
        assert_eq!(rate_percent(1.2), "+20%");
        assert_eq!(rate_percent(0.75), "-25%");
    }

    #[test]
    fn test_duration_rounds_up() {
        let output = SpeechOutput {
            audio_file: PathBuf::from("audio.mp3"),
            timings: vec![
                TimingEntry::new("Hi", 0, 4_000_000),
                TimingEntry::new("there", 5_000_000, 123_000_000),
            ],
        };
        assert_eq!(output.duration_seconds(), 13.0);

        let empty = SpeechOutput {
            audio_file: PathBuf::from("audio.mp3"),
            timings: vec![],
        };
        assert_eq!(empty.duration_seconds(), 0.0);
    }

    #[tokio::test]
    async fn test_empty_text_is_rejected() {
        let synth = EdgeTtsSynthesizer::default();
        let dir = tempfile::TempDir::new().unwrap();
        let result = synth
            .synthesize(&SpeechRequest::new("  ", "en-US-AriaNeural"), &dir.path().join("a.mp3"))
            .await;
        assert!(result.is_err());
    }
}
