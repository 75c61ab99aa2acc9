//! Final composition: narration, background music and burnt-in subtitles.

use std::path::{Path, PathBuf};

use tracing::info;

use vgen_models::{EncodingConfig, SubtitlePosition, VideoParams};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::MediaResult;
use crate::filters::{ass_color, escape_filter_path};

/// Background music fades out over this many seconds.
pub const BGM_FADE_OUT_SECONDS: f64 = 3.0;

/// libass lays out SRT subtitles on a 288-line canvas.
const ASS_PLAY_RES_Y: f64 = 288.0;

/// Subtitle look, in output pixels.
#[derive(Debug, Clone)]
pub struct SubtitleStyle {
    pub font_name: Option<String>,
    /// Directory searched for `font_name`
    pub fonts_dir: Option<PathBuf>,
    pub font_size: u32,
    pub fore_color: String,
    pub stroke_color: String,
    pub stroke_width: f64,
    pub background_color: Option<String>,
    pub position: SubtitlePosition,
    /// Percent from the top for custom positions
    pub custom_position: f64,
}

impl SubtitleStyle {
    pub fn from_params(params: &VideoParams, fonts_dir: Option<PathBuf>) -> Self {
        Self {
            font_name: params.font_name.clone(),
            fonts_dir,
            font_size: params.font_size,
            fore_color: params.text_fore_color.clone(),
            stroke_color: params.stroke_color.clone(),
            stroke_width: params.stroke_width,
            background_color: params.text_background_color.clone(),
            position: params.subtitle_position,
            custom_position: params.custom_position,
        }
    }

    /// `force_style` value for the subtitles filter, scaled to the frame height.
    pub fn force_style(&self, frame_height: u32) -> String {
        let scale = ASS_PLAY_RES_Y / frame_height.max(1) as f64;
        let mut parts = Vec::new();

        if let Some(font) = &self.font_name {
            let family = Path::new(font)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| font.clone());
            parts.push(format!("FontName={family}"));
        }
        parts.push(format!("FontSize={}", (self.font_size as f64 * scale).round().max(1.0)));
        if let Some(color) = ass_color(&self.fore_color) {
            parts.push(format!("PrimaryColour={color}"));
        }
        if let Some(color) = ass_color(&self.stroke_color) {
            parts.push(format!("OutlineColour={color}"));
        }
        parts.push(format!("Outline={:.1}", self.stroke_width));
        if let Some(color) = self.background_color.as_deref().and_then(ass_color) {
            parts.push("BorderStyle=3".to_string());
            parts.push(format!("BackColour={color}"));
        }

        let (alignment, margin) = match self.position {
            SubtitlePosition::Bottom => (2, 0.05),
            SubtitlePosition::Top => (8, 0.05),
            SubtitlePosition::Center => (5, 0.0),
            SubtitlePosition::Custom => (8, self.custom_position.clamp(0.0, 95.0) / 100.0),
        };
        parts.push(format!("Alignment={alignment}"));
        parts.push(format!("MarginV={}", (ASS_PLAY_RES_Y * margin).round()));

        parts.join(",")
    }
}

/// Inputs and settings for the final mux.
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    /// Silent combined video
    pub video: PathBuf,
    pub narration: PathBuf,
    /// Output length in seconds (the narration length)
    pub duration: f64,
    pub voice_volume: f64,
    pub bgm: Option<PathBuf>,
    pub bgm_volume: f64,
    pub subtitles: Option<(PathBuf, SubtitleStyle)>,
    pub resolution: (u32, u32),
}

/// Build the filter graph for a composition. Outputs `[v]` and `[a]`.
pub fn compose_graph(request: &ComposeRequest) -> String {
    let mut chains = Vec::new();

    match &request.subtitles {
        Some((srt, style)) => {
            let mut filter = format!("subtitles='{}'", escape_filter_path(srt));
            if let Some(dir) = &style.fonts_dir {
                filter.push_str(&format!(":fontsdir='{}'", escape_filter_path(dir)));
            }
            filter.push_str(&format!(
                ":force_style='{}'",
                style.force_style(request.resolution.1)
            ));
            chains.push(format!("[0:v]{filter}[v]"));
        }
        None => chains.push("[0:v]null[v]".to_string()),
    }

    let voice = format!("[1:a]volume={:.2}", request.voice_volume);
    if request.bgm.is_some() {
        let fade_start = (request.duration - BGM_FADE_OUT_SECONDS).max(0.0);
        chains.push(format!("{voice}[narration]"));
        chains.push(format!(
            "[2:a]volume={:.2},afade=t=out:st={:.3}:d={:.1}[music]",
            request.bgm_volume, fade_start, BGM_FADE_OUT_SECONDS
        ));
        chains.push(
            "[narration][music]amix=inputs=2:duration=first:dropout_transition=2:normalize=0[a]"
                .to_string(),
        );
    } else {
        chains.push(format!("{voice}[a]"));
    }

    chains.join(";")
}

/// Mux narration, optional music and optional subtitles onto the combined video.
pub async fn compose_final(
    runner: &FfmpegRunner,
    request: &ComposeRequest,
    encoding: &EncodingConfig,
    output: &Path,
) -> MediaResult<()> {
    let mut cmd = FfmpegCommand::new(&request.video, output).add_input(&request.narration);
    if let Some(bgm) = &request.bgm {
        cmd = cmd.add_input(bgm).stream_loop(-1);
    }

    let cmd = cmd
        .filter_complex(compose_graph(request))
        .map("[v]")
        .map("[a]")
        .output_duration(request.duration)
        .encoding(encoding);

    info!(
        bgm = request.bgm.is_some(),
        subtitles = request.subtitles.is_some(),
        "Composing final video {}",
        output.display()
    );
    runner.run(&cmd).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ComposeRequest {
        ComposeRequest {
            video: PathBuf::from("/t/combined-1.mp4"),
            narration: PathBuf::from("/t/audio.mp3"),
            duration: 20.0,
            voice_volume: 1.0,
            bgm: None,
            bgm_volume: 0.2,
            subtitles: None,
            resolution: (1080, 1920),
        }
    }

    #[test]
    fn test_graph_without_extras() {
        let graph = compose_graph(&request());
        assert_eq!(graph, "[0:v]null[v];[1:a]volume=1.00[a]");
    }

    #[test]
    fn test_graph_with_bgm_fades_out() {
        let mut req = request();
        req.bgm = Some(PathBuf::from("/songs/a.mp3"));
        let graph = compose_graph(&req);
        assert!(graph.contains("[2:a]volume=0.20,afade=t=out:st=17.000:d=3.0[music]"));
        assert!(graph.ends_with("[a]"));
    }

    #[test]
    fn test_graph_with_subtitles() {
        let mut req = request();
        let style = SubtitleStyle::from_params(&VideoParams::default(), None);
        req.subtitles = Some((PathBuf::from("/t/subtitle.srt"), style));
        let graph = compose_graph(&req);
        assert!(graph.starts_with("[0:v]subtitles='/t/subtitle.srt':force_style='"));
        assert!(graph.contains("Alignment=2"));
    }

    #[test]
    fn test_force_style_scales_font() {
        let mut style = SubtitleStyle::from_params(&VideoParams::default(), None);
        style.font_size = 60;
        style.font_name = Some("MicrosoftYaHeiBold.ttc".to_string());
        let forced = style.force_style(1920);
        // 60 * 288 / 1920 = 9
        assert!(forced.contains("FontSize=9"));
        assert!(forced.contains("FontName=MicrosoftYaHeiBold"));
        assert!(forced.contains("PrimaryColour=&H00FFFFFF"));
    }

    #[test]
    fn test_custom_position() {
        let mut style = SubtitleStyle::from_params(&VideoParams::default(), None);
        style.position = SubtitlePosition::Custom;
        style.custom_position = 50.0;
        let forced = style.force_style(1920);
        assert!(forced.contains("Alignment=8"));
        assert!(forced.contains("MarginV=144"));
    }
}
