//! Correction of independently transcribed subtitles against the script.
//!
//! Transcription gets the timing right but the wording (and the line breaks)
//! wrong. Each script sentence is matched to one or more consecutive
//! transcribed lines; the output keeps the observed timing and the script's
//! wording.

use tracing::{debug, warn};

use vgen_models::SubtitleItem;

use super::align::match_line;

/// Minimum similarity for accepting a merged span of transcribed lines.
pub const MERGE_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Character-level Levenshtein distance.
pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// `1 - distance / max_len`, case-insensitive. Two empty strings are identical.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(&a, &b) as f64 / max_len as f64
}

/// Rewrite transcribed lines with the script wording.
///
/// Sentences that run out of transcribed lines are appended as zero-length
/// items at the end of the previous item, so ordering is preserved.
pub fn correct_subtitles(sentences: &[String], transcribed: &[SubtitleItem]) -> Vec<SubtitleItem> {
    let mut corrected: Vec<SubtitleItem> = Vec::with_capacity(sentences.len());
    let mut line = 0;

    for sentence in sentences {
        let Some(current) = transcribed.get(line) else {
            let at = corrected.last().map(|i| i.end_time).unwrap_or(0.0);
            debug!("No transcribed line left for \"{}\", adding placeholder", sentence);
            push(&mut corrected, at, at, sentence);
            continue;
        };

        if match_line(current.text.trim(), sentence).is_some() {
            push(&mut corrected, current.start_time, current.end_time, sentence);
            line += 1;
            continue;
        }

        // Absorb following lines while the combined text keeps getting closer
        let mut merged = current.text.trim().to_string();
        let mut best = similarity(&merged, sentence);
        let mut last = line;
        while let Some(next) = transcribed.get(last + 1) {
            let candidate = format!("{} {}", merged, next.text.trim());
            let score = similarity(&candidate, sentence);
            if score > best {
                merged = candidate;
                best = score;
                last += 1;
            } else {
                break;
            }
        }

        if last > line && best > MERGE_SIMILARITY_THRESHOLD {
            push(
                &mut corrected,
                current.start_time,
                transcribed[last].end_time,
                sentence,
            );
            line = last + 1;
        } else {
            if best <= MERGE_SIMILARITY_THRESHOLD {
                warn!(
                    similarity = best,
                    "Transcribed line \"{}\" differs from script \"{}\"",
                    current.text.trim(),
                    sentence
                );
            }
            push(&mut corrected, current.start_time, current.end_time, sentence);
            line += 1;
        }
    }

    corrected
}

fn push(items: &mut Vec<SubtitleItem>, start: f64, end: f64, text: &str) {
    let index = items.len() as u32 + 1;
    items.push(SubtitleItem::new(index, start, end.max(start), text));
}
