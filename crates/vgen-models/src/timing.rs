//! Speech timing fragments and subtitle items.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Speech synthesizers report offsets in 100-nanosecond ticks.
pub const TICKS_PER_SECOND: u64 = 10_000_000;

/// A text fragment spoken between two audio offsets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TimingEntry {
    pub text: String,
    /// Start offset in ticks
    pub offset_start: u64,
    /// End offset in ticks
    pub offset_end: u64,
}

impl TimingEntry {
    pub fn new(text: impl Into<String>, offset_start: u64, offset_end: u64) -> Self {
        Self {
            text: text.into(),
            offset_start,
            offset_end,
        }
    }

    /// Build from offsets expressed in seconds.
    pub fn from_seconds(text: impl Into<String>, start: f64, end: f64) -> Self {
        Self::new(text, seconds_to_ticks(start), seconds_to_ticks(end))
    }

    pub fn start_seconds(&self) -> f64 {
        ticks_to_seconds(self.offset_start)
    }

    pub fn end_seconds(&self) -> f64 {
        ticks_to_seconds(self.offset_end)
    }
}

fn ticks_to_seconds(ticks: u64) -> f64 {
    ticks as f64 / TICKS_PER_SECOND as f64
}

fn seconds_to_ticks(seconds: f64) -> u64 {
    (seconds.max(0.0) * TICKS_PER_SECOND as f64).round() as u64
}

/// One subtitle cue. Times are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubtitleItem {
    /// 1-based position
    pub index: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub text: String,
}

impl SubtitleItem {
    pub fn new(index: u32, start_time: f64, end_time: f64, text: impl Into<String>) -> Self {
        Self {
            index,
            start_time,
            end_time,
            text: text.into(),
        }
    }

    pub fn duration(&self) -> f64 {
        (self.end_time - self.start_time).max(0.0)
    }
}
