//! Local material preparation.
//!
//! Local files are probed and rejected when smaller than the minimum size.
//! Still images become short zooming clips so the packer can treat every
//! material as video.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use vgen_models::{EncodingConfig, MaterialInfo};

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::image_zoom_filter;
use crate::probe::probe_video;

/// Materials narrower or shorter than this are skipped.
pub const MIN_MATERIAL_DIMENSION: u32 = 480;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "webp"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Probe, filter and convert local materials.
///
/// Unusable entries are logged and dropped; the result only contains
/// materials with a `local_path` and a positive duration.
pub async fn preprocess_local(
    runner: &FfmpegRunner,
    materials: &[MaterialInfo],
    clip_duration: f64,
    work_dir: &Path,
    encoding: &EncodingConfig,
) -> MediaResult<Vec<MaterialInfo>> {
    let mut prepared = Vec::with_capacity(materials.len());

    for (i, material) in materials.iter().enumerate() {
        let source = material
            .local_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(&material.url));

        let info = match probe_video(&source).await {
            Ok(info) => info,
            Err(MediaError::Cancelled) => return Err(MediaError::Cancelled),
            Err(e) => {
                warn!("Skipping local material {}: {}", source.display(), e);
                continue;
            }
        };

        if info.width < MIN_MATERIAL_DIMENSION || info.height < MIN_MATERIAL_DIMENSION {
            warn!(
                "Skipping local material {}: {}x{} is below {}x{}",
                source.display(),
                info.width,
                info.height,
                MIN_MATERIAL_DIMENSION,
                MIN_MATERIAL_DIMENSION
            );
            continue;
        }

        if is_image(&source) {
            let output = work_dir.join(format!("image-{:03}.mp4", i));
            let cmd = FfmpegCommand::new(&source, &output)
                .input_args(["-loop", "1"])
                .duration(clip_duration)
                .video_filter(image_zoom_filter(
                    info.width,
                    info.height,
                    clip_duration,
                    encoding.fps,
                ))
                .no_audio()
                .video_encoding(encoding);

            if let Err(e) = runner.run(&cmd).await {
                if matches!(e, MediaError::Cancelled) {
                    return Err(e);
                }
                warn!("Failed to convert image {}: {}", source.display(), e);
                continue;
            }
            info!("Converted image {} into a {:.1}s clip", source.display(), clip_duration);
            prepared.push(
                material
                    .clone()
                    .with_local_path(output)
                    .with_duration(clip_duration),
            );
        } else if info.duration > 0.0 {
            prepared.push(
                material
                    .clone()
                    .with_local_path(source)
                    .with_duration(info.duration),
            );
        } else {
            warn!("Skipping local material {}: no duration", source.display());
        }
    }

    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_is_image() {
        assert!(is_image(Path::new("/a/photo.JPG")));
        assert!(is_image(Path::new("b.webp")));
        assert!(!is_image(Path::new("c.mp4")));
        assert!(!is_image(Path::new("noext")));
    }

    #[tokio::test]
    async fn test_missing_files_are_skipped() {
        let dir = TempDir::new().unwrap();
        let materials = vec![MaterialInfo::local(dir.path().join("missing.mp4"))];

        let prepared = preprocess_local(
            &FfmpegRunner::new(),
            &materials,
            5.0,
            dir.path(),
            &EncodingConfig::default(),
        )
        .await
        .unwrap();

        assert!(prepared.is_empty());
    }
}
