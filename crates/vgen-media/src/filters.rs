//! FFmpeg filter graph builders.
//!
//! Segment graphs read `[0:v]` and always end in a `[v]` label.

use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;

use vgen_models::TransitionMode;

/// Sources whose aspect ratio is within this relative tolerance are scaled directly.
pub const ASPECT_TOLERANCE: f64 = 0.01;

/// Longest transition applied to a segment, in seconds.
pub const TRANSITION_SECONDS: f64 = 1.0;

/// Edge a slide transition moves from or to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlideSide {
    Left,
    Right,
    Top,
    Bottom,
}

impl SlideSide {
    pub const ALL: [SlideSide; 4] = [
        SlideSide::Left,
        SlideSide::Right,
        SlideSide::Top,
        SlideSide::Bottom,
    ];
}

/// A concrete transition chosen for one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    FadeIn,
    FadeOut,
    SlideIn(SlideSide),
    SlideOut(SlideSide),
}

impl Transition {
    /// Whether the transition animates the start of the segment.
    pub fn is_entry(&self) -> bool {
        matches!(self, Transition::FadeIn | Transition::SlideIn(_))
    }

    /// Resolve a requested mode into a concrete transition.
    ///
    /// Slides pick a random side; shuffle picks a random kind.
    pub fn choose<R: Rng + ?Sized>(mode: TransitionMode, rng: &mut R) -> Option<Transition> {
        let side = *SlideSide::ALL.choose(rng)?;
        match mode {
            TransitionMode::None => None,
            TransitionMode::FadeIn => Some(Transition::FadeIn),
            TransitionMode::FadeOut => Some(Transition::FadeOut),
            TransitionMode::SlideIn => Some(Transition::SlideIn(side)),
            TransitionMode::SlideOut => Some(Transition::SlideOut(side)),
            TransitionMode::Shuffle => [
                Transition::FadeIn,
                Transition::FadeOut,
                Transition::SlideIn(side),
                Transition::SlideOut(side),
            ]
            .choose(rng)
            .copied(),
        }
    }
}

/// Filter chain that fits a source into the target frame without distortion.
///
/// Near-matching aspect ratios are scaled straight to the target size. Anything
/// else is scaled to fit and centered on black padding.
pub fn normalize_filter(src_width: u32, src_height: u32, target: (u32, u32)) -> String {
    let (tw, th) = target;
    let target_ratio = tw as f64 / th as f64;
    let same_shape = src_height > 0 && {
        let src_ratio = src_width as f64 / src_height as f64;
        ((src_ratio - target_ratio) / target_ratio).abs() <= ASPECT_TOLERANCE
    };

    if same_shape {
        format!("scale={tw}:{th},setsar=1")
    } else {
        format!(
            "scale={tw}:{th}:force_original_aspect_ratio=decrease:force_divisible_by=2,\
             pad={tw}:{th}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1"
        )
    }
}

/// Complete filter graph for one segment: normalization plus optional transition.
pub fn segment_graph(
    normalize: &str,
    transition: Option<Transition>,
    duration: f64,
    target: (u32, u32),
    fps: u32,
) -> String {
    let t = TRANSITION_SECONDS.min(duration / 2.0).max(0.0);
    let (w, h) = target;

    match transition {
        None => format!("[0:v]{normalize}[v]"),
        Some(Transition::FadeIn) => format!("[0:v]{normalize},fade=t=in:st=0:d={t:.3}[v]"),
        Some(Transition::FadeOut) => format!(
            "[0:v]{normalize},fade=t=out:st={:.3}:d={t:.3}[v]",
            (duration - t).max(0.0)
        ),
        Some(Transition::SlideIn(side)) | Some(Transition::SlideOut(side)) => {
            let entering = matches!(transition, Some(Transition::SlideIn(_)));
            let (x, y) = slide_position(side, entering, duration, t);
            format!(
                "color=c=black:s={w}x{h}:r={fps}:d={duration:.3}[bg];\
                 [0:v]{normalize}[fg];\
                 [bg][fg]overlay=x='{x}':y='{y}':shortest=1[v]"
            )
        }
    }
}

/// Overlay position expressions for a slide over `t` seconds.
fn slide_position(side: SlideSide, entering: bool, duration: f64, t: f64) -> (String, String) {
    // Fraction of the frame still off-screen
    let offset = if entering {
        format!("max(0,1-t/{t:.3})")
    } else {
        format!("max(0,(t-{:.3})/{t:.3})", (duration - t).max(0.0))
    };
    match side {
        SlideSide::Left => (format!("-w*{offset}"), "0".to_string()),
        SlideSide::Right => (format!("w*{offset}"), "0".to_string()),
        SlideSide::Top => ("0".to_string(), format!("-h*{offset}")),
        SlideSide::Bottom => ("0".to_string(), format!("h*{offset}")),
    }
}

/// Slow zoom that turns a still image into `duration` seconds of video.
pub fn image_zoom_filter(width: u32, height: u32, duration: f64, fps: u32) -> String {
    let frames = (duration * fps as f64).ceil().max(1.0) as u64;
    // zoompan needs even output dimensions
    let w = width - width % 2;
    let h = height - height % 2;
    format!(
        "scale={}:{},zoompan=z='min(zoom+0.0015,1.2)':d={frames}:\
         x='iw/2-(iw/zoom/2)':y='ih/2-(ih/zoom/2)':s={w}x{h}:fps={fps}",
        w * 2,
        h * 2
    )
}

/// Escape a path for use as a filter option value.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Convert `#RRGGBB` to libass `&HAABBGGRR`.
pub fn ass_color(hex: &str) -> Option<String> {
    let hex = hex.trim().trim_start_matches('#');
    if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let (r, g, b) = (&hex[0..2], &hex[2..4], &hex[4..6]);
    Some(format!("&H00{b}{g}{r}").to_uppercase())
}
