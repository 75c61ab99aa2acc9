//! Media operations used by the pipeline.
//!
//! The pipeline talks to downloads and ffmpeg through these traits so runs can
//! be exercised without network or encoder.

use std::path::Path;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;

use vgen_media::{
    compose_final, preprocess_local, CachedMaterial, ClipPacker, ComposeRequest, FfmpegRunner,
    FfmpegSegmentEncoder, MaterialDownloader, MediaResult, PackOptions, PackReport,
};
use vgen_models::{EncodingConfig, MaterialInfo};

/// Fetches remote material into the local cache.
#[async_trait]
pub trait MaterialFetch: Send + Sync {
    /// Local copy of `url`, with its probed duration when known.
    async fn fetch(&self, url: &str) -> MediaResult<CachedMaterial>;
}

#[async_trait]
impl MaterialFetch for MaterialDownloader {
    async fn fetch(&self, url: &str) -> MediaResult<CachedMaterial> {
        self.download(url).await
    }
}

/// Encoder-side work of a pipeline run.
#[async_trait]
pub trait Assembler: Send + Sync {
    /// Probe, filter and convert caller-supplied files.
    async fn prepare_local(
        &self,
        runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        clip_duration: f64,
        work_dir: &Path,
        encoding: &EncodingConfig,
    ) -> MediaResult<Vec<MaterialInfo>>;

    /// Pack `materials` into one video covering `target` seconds.
    async fn combine(
        &self,
        runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        target: f64,
        options: PackOptions,
        encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<PackReport>;

    /// Mux narration, music and subtitles onto a combined video.
    async fn compose(
        &self,
        runner: &FfmpegRunner,
        request: &ComposeRequest,
        encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<()>;
}

/// ffmpeg-backed assembler.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegAssembler;

#[async_trait]
impl Assembler for FfmpegAssembler {
    async fn prepare_local(
        &self,
        runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        clip_duration: f64,
        work_dir: &Path,
        encoding: &EncodingConfig,
    ) -> MediaResult<Vec<MaterialInfo>> {
        preprocess_local(runner, materials, clip_duration, work_dir, encoding).await
    }

    async fn combine(
        &self,
        runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        target: f64,
        options: PackOptions,
        encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<PackReport> {
        let encoder =
            FfmpegSegmentEncoder::new(runner.clone(), encoding.clone(), options.resolution);
        let packer = ClipPacker::new(encoder, options);
        let mut rng = StdRng::from_os_rng();
        packer.pack(materials, target, output, &mut rng).await
    }

    async fn compose(
        &self,
        runner: &FfmpegRunner,
        request: &ComposeRequest,
        encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<()> {
        compose_final(runner, request, encoding, output).await
    }
}
