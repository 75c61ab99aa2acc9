//! Forward alignment of synthesizer timing against script sentences.

use std::sync::LazyLock;

use regex::Regex;
use tracing::warn;

use vgen_models::{SubtitleItem, TimingEntry};

use crate::error::{MediaError, MediaResult};

static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s]").expect("valid punctuation regex"));
static NON_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\W+").expect("valid non-word regex"));

/// How a buffered line matched its sentence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchLevel {
    Exact,
    /// Equal once punctuation is removed
    IgnoringPunctuation,
    /// Equal once every non-word character, whitespace included, is removed
    WordCharsOnly,
}

/// Compare a candidate line with an expected sentence, strictest level first.
pub fn match_line(candidate: &str, sentence: &str) -> Option<MatchLevel> {
    if candidate == sentence {
        return Some(MatchLevel::Exact);
    }
    let sentence_stripped = PUNCTUATION.replace_all(sentence, "");
    if PUNCTUATION.replace_all(candidate, "") == sentence_stripped {
        return Some(MatchLevel::IgnoringPunctuation);
    }
    let sentence_words = NON_WORD.replace_all(sentence, "");
    if !sentence_words.is_empty() && NON_WORD.replace_all(candidate, "") == sentence_words {
        return Some(MatchLevel::WordCharsOnly);
    }
    None
}

/// Attach synthesizer timing to script sentences.
///
/// Fragments are buffered until the buffer matches the next sentence, which is
/// then emitted spanning from the first buffered fragment to the current one.
/// The pass fails unless every sentence is matched.
pub fn align_forward(entries: &[TimingEntry], sentences: &[String]) -> MediaResult<Vec<SubtitleItem>> {
    let mut items = Vec::with_capacity(sentences.len());
    let mut buffer = String::new();
    let mut start: Option<f64> = None;

    for entry in entries {
        let Some(sentence) = sentences.get(items.len()) else {
            break;
        };
        if start.is_none() {
            start = Some(entry.start_seconds());
        }
        buffer.push_str(&entry.text);

        if match_line(&buffer, sentence).is_some() {
            items.push(SubtitleItem::new(
                items.len() as u32 + 1,
                start.unwrap_or_default(),
                entry.end_seconds(),
                sentence.clone(),
            ));
            buffer.clear();
            start = None;
        }
    }

    if items.len() != sentences.len() {
        warn!(
            expected = sentences.len(),
            matched = items.len(),
            "Forward subtitle alignment incomplete"
        );
        return Err(MediaError::AlignmentMismatch {
            expected: sentences.len(),
            matched: items.len(),
        });
    }
    Ok(items)
}
