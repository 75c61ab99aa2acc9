//! Generation request parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::MaterialInfo;

/// Output frame shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
pub enum VideoAspect {
    #[serde(rename = "16:9", alias = "landscape")]
    Landscape,
    #[default]
    #[serde(rename = "9:16", alias = "portrait")]
    Portrait,
    #[serde(rename = "1:1", alias = "square")]
    Square,
}

impl VideoAspect {
    /// Output resolution as (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        match self {
            VideoAspect::Landscape => (1920, 1080),
            VideoAspect::Portrait => (1080, 1920),
            VideoAspect::Square => (1080, 1080),
        }
    }

    /// Width divided by height.
    pub fn ratio(&self) -> f64 {
        let (w, h) = self.resolution();
        w as f64 / h as f64
    }

    /// Orientation name used by stock footage APIs.
    pub fn orientation(&self) -> &'static str {
        match self {
            VideoAspect::Landscape => "landscape",
            VideoAspect::Portrait => "portrait",
            VideoAspect::Square => "square",
        }
    }
}

impl fmt::Display for VideoAspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VideoAspect::Landscape => "16:9",
            VideoAspect::Portrait => "9:16",
            VideoAspect::Square => "1:1",
        };
        f.write_str(s)
    }
}

/// How source materials are ordered into segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConcatMode {
    /// Shuffle candidates and cut long sources into several windows
    #[default]
    Random,
    /// Keep search order and use only the first window of each source
    Sequential,
}

/// Transition applied to each segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TransitionMode {
    #[default]
    None,
    FadeIn,
    FadeOut,
    SlideIn,
    SlideOut,
    /// Random pick among the other four, per segment
    Shuffle,
}

impl TransitionMode {
    /// Whether this transition animates the start of a segment.
    pub fn is_entry(&self) -> bool {
        matches!(self, TransitionMode::FadeIn | TransitionMode::SlideIn)
    }
}

/// Where source footage comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum VideoSource {
    #[default]
    Pexels,
    Pixabay,
    Local,
}

impl VideoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoSource::Pexels => "pexels",
            VideoSource::Pixabay => "pixabay",
            VideoSource::Local => "local",
        }
    }
}

/// Background music selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum BgmType {
    None,
    /// Pick a random track from the song directory
    #[default]
    Random,
}

/// Vertical placement of burnt-in subtitles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum SubtitlePosition {
    Top,
    Center,
    #[default]
    Bottom,
    /// Use `custom_position` (percent from the top)
    Custom,
}

/// Search terms given either as a list or as one comma separated string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum TermsInput {
    List(Vec<String>),
    Text(String),
}

impl TermsInput {
    /// Normalized, non-empty terms. Both ASCII and full-width commas separate.
    pub fn to_terms(&self) -> Vec<String> {
        let raw: Vec<&str> = match self {
            TermsInput::List(items) => items.iter().map(String::as_str).collect(),
            TermsInput::Text(text) => text.split([',', '，']).collect(),
        };
        raw.into_iter()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Parameters for one video generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct VideoParams {
    pub video_subject: String,

    /// Use this script instead of generating one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_script: Option<String>,

    /// Use these search terms instead of generating them
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_terms: Option<TermsInput>,

    pub video_aspect: VideoAspect,
    pub video_concat_mode: ConcatMode,
    pub video_transition_mode: TransitionMode,

    /// Maximum length of a single segment in seconds
    pub video_clip_duration: u32,

    /// Number of final videos to produce
    pub video_count: u32,

    pub video_source: VideoSource,

    /// Files used when `video_source` is local
    pub video_materials: Vec<MaterialInfo>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_language: Option<String>,

    pub voice_name: String,
    pub voice_volume: f64,
    pub voice_rate: f64,

    pub bgm_type: BgmType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bgm_file: Option<PathBuf>,
    pub bgm_volume: f64,

    pub subtitle_enabled: bool,
    pub subtitle_position: SubtitlePosition,
    /// Percent from the top when the position is custom
    pub custom_position: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_name: Option<String>,
    pub text_fore_color: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_background_color: Option<String>,
    pub font_size: u32,
    pub stroke_color: String,
    pub stroke_width: f64,

    /// Paragraphs requested from the script generator
    pub paragraph_number: u32,

    /// Encoder threads
    pub n_threads: u32,
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            video_subject: String::new(),
            video_script: None,
            video_terms: None,
            video_aspect: VideoAspect::Portrait,
            video_concat_mode: ConcatMode::Random,
            video_transition_mode: TransitionMode::None,
            video_clip_duration: 5,
            video_count: 1,
            video_source: VideoSource::Pexels,
            video_materials: Vec::new(),
            video_language: None,
            voice_name: "en-US-AriaNeural".to_string(),
            voice_volume: 1.0,
            voice_rate: 1.0,
            bgm_type: BgmType::Random,
            bgm_file: None,
            bgm_volume: 0.2,
            subtitle_enabled: true,
            subtitle_position: SubtitlePosition::Bottom,
            custom_position: 70.0,
            font_name: None,
            text_fore_color: "#FFFFFF".to_string(),
            text_background_color: None,
            font_size: 60,
            stroke_color: "#000000".to_string(),
            stroke_width: 1.5,
            paragraph_number: 1,
            n_threads: 2,
        }
    }
}

impl VideoParams {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            video_subject: subject.into(),
            ..Default::default()
        }
    }

    /// Caller-provided script, if it has any content.
    pub fn provided_script(&self) -> Option<&str> {
        self.video_script
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Caller-provided search terms, if any survive normalization.
    pub fn provided_terms(&self) -> Option<Vec<String>> {
        self.video_terms
            .as_ref()
            .map(TermsInput::to_terms)
            .filter(|t| !t.is_empty())
    }

    /// Maximum segment length in seconds, never zero.
    pub fn max_clip_duration(&self) -> f64 {
        self.video_clip_duration.max(1) as f64
    }

    /// Number of outputs, never zero.
    pub fn output_count(&self) -> u32 {
        self.video_count.max(1)
    }
}
