//! Subtitle generation and synchronization.
//!
//! - [`split_sentences`] breaks the script into subtitle lines
//! - [`align_forward`] attaches synthesizer timing to those lines
//! - [`correct_subtitles`] repairs an independent transcription against them
//! - [`srt`] reads and writes SRT files

pub mod align;
pub mod correct;
pub mod split;
pub mod srt;

use std::path::Path;

use tracing::info;

use vgen_models::{SubtitleItem, TimingEntry};

use crate::error::MediaResult;

pub use align::{align_forward, match_line, MatchLevel};
pub use correct::{correct_subtitles, similarity, MERGE_SIMILARITY_THRESHOLD};
pub use split::{split_sentences, PUNCTUATIONS};

/// Align synthesizer timing with `script` and write the result to `output`.
///
/// Fails with an alignment error when the timing does not cover every sentence;
/// nothing is written in that case.
pub async fn write_aligned_subtitles(
    entries: &[TimingEntry],
    script: &str,
    output: &Path,
) -> MediaResult<Vec<SubtitleItem>> {
    let sentences = split_sentences(script);
    let items = align_forward(entries, &sentences)?;
    srt::write_srt(output, &items).await?;
    info!("Wrote {} aligned subtitle lines to {}", items.len(), output.display());
    Ok(items)
}

/// Rewrite a transcribed SRT file in place with the script wording.
pub async fn correct_subtitle_file(path: &Path, script: &str) -> MediaResult<Vec<SubtitleItem>> {
    let transcribed = srt::read_srt(path).await?;
    let sentences = split_sentences(script);
    let corrected = correct_subtitles(&sentences, &transcribed);
    srt::write_srt(path, &corrected).await?;
    info!(
        transcribed = transcribed.len(),
        corrected = corrected.len(),
        "Corrected subtitles in {}",
        path.display()
    );
    Ok(corrected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_write_aligned_subtitles() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtitle.srt");
        let entries = vec![
            TimingEntry::from_seconds("Hi", 0.0, 0.4),
            TimingEntry::from_seconds("there", 0.5, 1.0),
        ];

        let items = write_aligned_subtitles(&entries, "Hi there.", &path).await.unwrap();

        assert_eq!(items.len(), 1);
        let content = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(content.starts_with("1\n00:00:00,000 --> 00:00:01,000\nHi there\n"));
    }

    #[tokio::test]
    async fn test_failed_alignment_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtitle.srt");
        let entries = vec![TimingEntry::from_seconds("Hi", 0.0, 0.4)];

        let result = write_aligned_subtitles(&entries, "Hi. Bye.", &path).await;

        assert!(matches!(result, Err(MediaError::AlignmentMismatch { .. })));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_correct_subtitle_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtitle.srt");
        tokio::fs::write(
            &path,
            "1\n00:00:00,000 --> 00:00:01,000\nhello word\n\n2\n00:00:01,000 --> 00:00:02,000\ngoodbye\n",
        )
        .await
        .unwrap();

        let corrected = correct_subtitle_file(&path, "Hello world. Goodbye.").await.unwrap();

        assert_eq!(corrected.len(), 2);
        let back = srt::read_srt(&path).await.unwrap();
        assert_eq!(back[0].text, "Hello world");
        assert_eq!(back[1].text, "Goodbye");
    }
}
