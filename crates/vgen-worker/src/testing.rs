//! Fake providers and media for pipeline tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::{watch, Semaphore};

use vgen_media::{
    CachedMaterial, ComposeRequest, FfmpegRunner, MediaResult, PackOptions, PackReport,
};
use vgen_models::{
    BgmType, EncodingConfig, MaterialInfo, TermsInput, TimingEntry, VideoAspect, VideoParams,
    VideoSource,
};
use vgen_providers::{
    MaterialSearch, ProviderError, ProviderResult, SpeechOutput, SpeechRequest, SpeechSynthesizer,
    TextGenerator,
};
use vgen_queue::MemoryStateStore;

use crate::config::WorkerConfig;
use crate::media::{Assembler, MaterialFetch};
use crate::pipeline::{Pipeline, Providers};
use crate::retry::RetryPolicy;

pub const SCRIPT: &str = "Hello world. Rust is fast.";

pub struct FixedGenerator {
    reply: String,
    pub calls: AtomicUsize,
}

impl FixedGenerator {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl TextGenerator for FixedGenerator {
    async fn generate_text(&self, _prompt: &str) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.reply.clone())
    }

    fn name(&self) -> &str {
        "fixed"
    }
}

#[derive(Default)]
pub struct FailingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl TextGenerator for FailingGenerator {
    async fn generate_text(&self, _prompt: &str) -> ProviderResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::request_failed("quota exceeded"))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Narration whose timing matches [`SCRIPT`] word by word.
///
/// With a gate set, synthesis blocks until a permit is released.
#[derive(Default)]
pub struct FakeSpeech {
    pub gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(
        &self,
        _request: &SpeechRequest,
        output: &Path,
    ) -> ProviderResult<SpeechOutput> {
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        tokio::fs::write(output, b"mp3").await?;
        Ok(SpeechOutput {
            audio_file: output.to_path_buf(),
            timings: vec![
                TimingEntry::from_seconds("Hello", 0.1, 0.5),
                TimingEntry::from_seconds("world", 0.6, 1.0),
                TimingEntry::from_seconds("Rust", 1.4, 1.7),
                TimingEntry::from_seconds("is", 1.8, 1.9),
                TimingEntry::from_seconds("fast", 2.0, 2.6),
            ],
        })
    }
}

pub struct FakeSearch {
    results: Vec<MaterialInfo>,
    pub calls: AtomicUsize,
}

#[async_trait]
impl MaterialSearch for FakeSearch {
    async fn search(&self, _term: &str, _min: f64, _aspect: VideoAspect) -> Vec<MaterialInfo> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.results.clone()
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Cache lookups that never touch the network.
///
/// `file_duration` stands in for the length ffprobe reports for every file.
#[derive(Default)]
pub struct FakeFetcher {
    pub calls: AtomicUsize,
    pub file_duration: Mutex<Option<f64>>,
}

#[async_trait]
impl MaterialFetch for FakeFetcher {
    async fn fetch(&self, url: &str) -> MediaResult<CachedMaterial> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(CachedMaterial {
            path: PathBuf::from("/cache").join(vgen_media::url_hash(url)),
            duration: *self.file_duration.lock().unwrap(),
        })
    }
}

#[derive(Default)]
pub struct FakeAssembler {
    pub combined: AtomicUsize,
    pub composed: AtomicUsize,
}

#[async_trait]
impl Assembler for FakeAssembler {
    async fn prepare_local(
        &self,
        _runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        clip_duration: f64,
        _work_dir: &Path,
        _encoding: &EncodingConfig,
    ) -> MediaResult<Vec<MaterialInfo>> {
        Ok(materials
            .iter()
            .cloned()
            .map(|m| m.with_duration(clip_duration))
            .collect())
    }

    async fn combine(
        &self,
        _runner: &FfmpegRunner,
        materials: &[MaterialInfo],
        target: f64,
        _options: PackOptions,
        _encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<PackReport> {
        self.combined.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"combined").await?;
        Ok(PackReport {
            output: output.to_path_buf(),
            planned: materials.len(),
            encoded: materials.len(),
            skipped: 0,
            looped: 0,
            duration: target,
        })
    }

    async fn compose(
        &self,
        _runner: &FfmpegRunner,
        _request: &ComposeRequest,
        _encoding: &EncodingConfig,
        output: &Path,
    ) -> MediaResult<()> {
        self.composed.fetch_add(1, Ordering::SeqCst);
        tokio::fs::write(output, b"final").await?;
        Ok(())
    }
}

pub struct Harness {
    _dir: TempDir,
    pub pipeline: Arc<Pipeline>,
    pub store: Arc<MemoryStateStore>,
    pub search: Arc<FakeSearch>,
    pub fetcher: Arc<FakeFetcher>,
    pub assembler: Arc<FakeAssembler>,
}

/// Remote clips of `duration` seconds each.
pub fn footage(count: usize, duration: f64) -> Vec<MaterialInfo> {
    (0..count)
        .map(|i| MaterialInfo::remote("fake", format!("https://cdn.test/{i}.mp4"), duration))
        .collect()
}

pub fn harness(text: Option<Arc<dyn TextGenerator>>, results: Vec<MaterialInfo>) -> Harness {
    harness_with_speech(text, results, FakeSpeech::default())
}

pub fn harness_with_speech(
    text: Option<Arc<dyn TextGenerator>>,
    results: Vec<MaterialInfo>,
    speech: FakeSpeech,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let config = WorkerConfig::default().with_work_dir(dir.path());
    let store = Arc::new(MemoryStateStore::new());
    let search = Arc::new(FakeSearch {
        results,
        calls: AtomicUsize::new(0),
    });
    let fetcher = Arc::new(FakeFetcher::default());
    let assembler = Arc::new(FakeAssembler::default());

    let mut providers =
        Providers::new(Arc::new(speech)).with_search(VideoSource::Pexels, search.clone());
    if let Some(text) = text {
        providers = providers.with_text(text);
    }

    let pipeline = Pipeline::new(
        config,
        providers,
        store.clone(),
        fetcher.clone(),
        assembler.clone(),
    )
    .with_script_retry(RetryPolicy::new("script").with_base_delay(Duration::from_millis(1)));

    Harness {
        _dir: dir,
        pipeline: Arc::new(pipeline),
        store,
        search,
        fetcher,
        assembler,
    }
}

/// Params with script and terms given, so no generator is needed.
pub fn params() -> VideoParams {
    let mut params = VideoParams::new("rust");
    params.video_script = Some(SCRIPT.to_string());
    params.video_terms = Some(TermsInput::Text("rust, crab".to_string()));
    params.bgm_type = BgmType::None;
    params
}

/// A cancel flag that never flips.
pub fn idle() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}
