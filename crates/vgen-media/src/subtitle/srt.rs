//! SRT formatting and parsing.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

use vgen_models::SubtitleItem;

use crate::error::{MediaError, MediaResult};

static TIME_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+):(\d{2}):(\d{2})[,.](\d{1,3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{1,3})")
        .expect("valid srt time regex")
});

/// Format seconds as `HH:MM:SS,mmm`.
pub fn format_timestamp(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let total_secs = total_ms / 1000;
    format!(
        "{:02}:{:02}:{:02},{:03}",
        total_secs / 3600,
        (total_secs % 3600) / 60,
        total_secs % 60,
        ms
    )
}

/// Render items as SRT. Indices are rewritten to be contiguous from 1.
pub fn to_srt(items: &[SubtitleItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_timestamp(item.start_time),
                format_timestamp(item.end_time),
                item.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Write items to an SRT file.
pub async fn write_srt(path: impl AsRef<Path>, items: &[SubtitleItem]) -> MediaResult<()> {
    tokio::fs::write(path, to_srt(items)).await?;
    Ok(())
}

/// Read an SRT file.
pub async fn read_srt(path: impl AsRef<Path>) -> MediaResult<Vec<SubtitleItem>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse_srt(&content)
}

fn capture_seconds(caps: &regex::Captures<'_>, first: usize) -> Option<f64> {
    let h: f64 = caps.get(first)?.as_str().parse().ok()?;
    let m: f64 = caps.get(first + 1)?.as_str().parse().ok()?;
    let s: f64 = caps.get(first + 2)?.as_str().parse().ok()?;
    let frac = caps.get(first + 3)?.as_str();
    // "5" in "00:00:01,5" means 500 ms
    let ms: f64 = format!("{:0<3}", frac).parse().ok()?;
    Some(h * 3600.0 + m * 60.0 + s + ms / 1000.0)
}

/// Parse SRT content. Multi-line cue text is joined with spaces.
pub fn parse_srt(content: &str) -> MediaResult<Vec<SubtitleItem>> {
    let normalized = content.replace("\r\n", "\n");
    let mut items = Vec::new();

    for block in normalized.split("\n\n") {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if lines.is_empty() {
            continue;
        }

        let time_pos = lines
            .iter()
            .position(|l| TIME_LINE.is_match(l))
            .ok_or_else(|| MediaError::InvalidSubtitle(format!("missing time line in: {}", block.trim())))?;
        let caps = TIME_LINE
            .captures(lines[time_pos])
            .ok_or_else(|| MediaError::InvalidSubtitle(lines[time_pos].to_string()))?;
        let start = capture_seconds(&caps, 1)
            .ok_or_else(|| MediaError::InvalidSubtitle(lines[time_pos].to_string()))?;
        let end = capture_seconds(&caps, 5)
            .ok_or_else(|| MediaError::InvalidSubtitle(lines[time_pos].to_string()))?;

        let text = lines[time_pos + 1..].join(" ");
        items.push(SubtitleItem::new(items.len() as u32 + 1, start, end, text));
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(2.36), "00:00:02,360");
        assert_eq!(format_timestamp(3725.5), "01:02:05,500");
    }

    #[test]
    fn test_parse_srt() {
        let content = "1\r\n00:00:00,000 --> 00:00:02,360\r\nHello\r\nworld\r\n\r\n\
                       2\r\n00:00:02.500 --> 00:00:04.1\r\nAgain\r\n";
        let items = parse_srt(content).unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].text, "Hello world");
        assert!((items[0].end_time - 2.36).abs() < 1e-9);
        assert!((items[1].start_time - 2.5).abs() < 1e-9);
        assert!((items[1].end_time - 4.1).abs() < 1e-9);
        assert_eq!(items[1].index, 2);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_srt("1\nnot a time\nHello\n"),
            Err(MediaError::InvalidSubtitle(_))
        ));
        assert!(parse_srt("\n\n").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_write_then_read_reindexes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("subtitle.srt");
        let items = vec![
            SubtitleItem::new(7, 0.0, 1.25, "First line"),
            SubtitleItem::new(9, 1.5, 3.0, "Second line"),
        ];

        write_srt(&path, &items).await.unwrap();
        let back = read_srt(&path).await.unwrap();

        assert_eq!(back[0].index, 1);
        assert_eq!(back[1].index, 2);
        assert_eq!(back[1].text, "Second line");
        assert!((back[0].end_time - 1.25).abs() < 1e-9);
    }
}
