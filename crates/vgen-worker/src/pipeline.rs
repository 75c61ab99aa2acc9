//! Video generation pipeline.
//!
//! Runs Script, Terms, Audio, Subtitle, Materials and Assemble in order for one
//! task, persisting progress and outputs to the state store after every step.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use rand::seq::{IndexedRandom, SliceRandom};
use serde_json::json;
use tokio::sync::watch;
use tracing::Instrument;

use vgen_media::{
    correct_subtitle_file, target_duration, write_aligned_subtitles, ComposeRequest,
    FfmpegRunner, MediaError, PackOptions, SubtitleStyle,
};
use vgen_models::{
    BgmType, ConcatMode, EncodingConfig, MaterialInfo, Stage, TaskRecord, TimingEntry,
    VideoParams, VideoSource,
};
use vgen_providers::{
    request_script, request_terms, MaterialSearch, ProviderError, SpeechRequest,
    SpeechSynthesizer, SubtitleProvider, TextGenerator, Transcriber,
};
use vgen_queue::{GenerateVideoJob, StateStore};

use crate::config::WorkerConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::TaskLogger;
use crate::media::{Assembler, MaterialFetch};
use crate::metrics;
use crate::retry::{retry_async_if, RetryPolicy};

/// Providers selected once at startup.
#[derive(Clone)]
pub struct Providers {
    pub text: Option<Arc<dyn TextGenerator>>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
    pub pexels: Option<Arc<dyn MaterialSearch>>,
    pub pixabay: Option<Arc<dyn MaterialSearch>>,
}

impl Providers {
    pub fn new(speech: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            text: None,
            speech,
            transcriber: None,
            pexels: None,
            pixabay: None,
        }
    }

    pub fn with_text(mut self, text: Arc<dyn TextGenerator>) -> Self {
        self.text = Some(text);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_search(mut self, source: VideoSource, search: Arc<dyn MaterialSearch>) -> Self {
        match source {
            VideoSource::Pexels => self.pexels = Some(search),
            VideoSource::Pixabay => self.pixabay = Some(search),
            VideoSource::Local => {}
        }
        self
    }

    /// Search provider for a remote source.
    pub fn search_for(&self, source: VideoSource) -> Option<&Arc<dyn MaterialSearch>> {
        match source {
            VideoSource::Pexels => self.pexels.as_ref(),
            VideoSource::Pixabay => self.pixabay.as_ref(),
            VideoSource::Local => None,
        }
    }
}

/// State carried between stages of one run.
struct RunContext<'a> {
    params: &'a VideoParams,
    task_dir: PathBuf,
    logger: TaskLogger,
    runner: FfmpegRunner,
    encoding: EncodingConfig,
    cancel: watch::Receiver<bool>,
    timings: Vec<TimingEntry>,
}

impl RunContext<'_> {
    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn ensure_active(&self) -> PipelineResult<()> {
        if self.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Executes generation jobs.
pub struct Pipeline {
    config: WorkerConfig,
    providers: Providers,
    store: Arc<dyn StateStore>,
    fetcher: Arc<dyn MaterialFetch>,
    assembler: Arc<dyn Assembler>,
    encoding: EncodingConfig,
    subtitle_provider: SubtitleProvider,
    script_retry: RetryPolicy,
}

impl Pipeline {
    pub fn new(
        config: WorkerConfig,
        providers: Providers,
        store: Arc<dyn StateStore>,
        fetcher: Arc<dyn MaterialFetch>,
        assembler: Arc<dyn Assembler>,
    ) -> Self {
        let script_retry = RetryPolicy::new("script").with_max_attempts(config.script_attempts);
        Self {
            config,
            providers,
            store,
            fetcher,
            assembler,
            encoding: EncodingConfig::default(),
            subtitle_provider: SubtitleProvider::default(),
            script_retry,
        }
    }

    pub fn with_subtitle_provider(mut self, provider: SubtitleProvider) -> Self {
        self.subtitle_provider = provider;
        self
    }

    pub fn with_encoding(mut self, encoding: EncodingConfig) -> Self {
        self.encoding = encoding;
        self
    }

    pub fn with_script_retry(mut self, policy: RetryPolicy) -> Self {
        self.script_retry = policy;
        self
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Run `job` to completion, failure or `stop_at`, returning the final record.
    ///
    /// The record is persisted after every stage, so callers polling the store
    /// see the same progress.
    pub async fn run(&self, job: &GenerateVideoJob, cancel: watch::Receiver<bool>) -> TaskRecord {
        let span = TaskLogger::new(&job.task_id).create_span();
        self.execute(job, cancel).instrument(span).await
    }

    async fn execute(&self, job: &GenerateVideoJob, cancel: watch::Receiver<bool>) -> TaskRecord {
        let logger = TaskLogger::new(&job.task_id);
        let mut record = TaskRecord::new(job.task_id.clone());
        if let Ok(Some(existing)) = self.store.get(&job.task_id).await {
            record.created_at = existing.created_at;
        }
        record.set_progress(5);
        self.persist(&record).await;
        logger.log_start(&format!("generating video for '{}'", job.params.video_subject));

        if let Err((stage, e)) = self.preflight(job) {
            return self.fail(record, &logger, stage, e).await;
        }

        let task_dir = self.config.task_dir(&job.task_id);
        if let Err(e) = tokio::fs::create_dir_all(&task_dir).await {
            return self.fail(record, &logger, Stage::Script, e.into()).await;
        }

        let mut ctx = RunContext {
            params: &job.params,
            task_dir,
            logger: logger.clone(),
            runner: FfmpegRunner::new().with_cancel(cancel.clone()),
            encoding: self.encoding.clone().with_threads(job.params.n_threads),
            cancel,
            timings: Vec::new(),
        };

        for stage in Stage::ALL {
            if let Err(e) = ctx.ensure_active() {
                return self.fail(record, &logger, stage, e).await;
            }

            ctx.logger = logger.for_stage(stage);
            let started = Instant::now();
            let result = self.run_stage(stage, &mut ctx, &mut record).await;
            metrics::record_stage_duration(stage, started.elapsed().as_secs_f64());

            if let Err(e) = result {
                return self.fail(record, &logger, stage, e).await;
            }

            record.set_progress(stage.checkpoint());
            self.persist(&record).await;

            if job.stop_at == Some(stage) {
                logger.log_progress(&format!("stopping after {}", stage));
                break;
            }
        }

        record.complete();
        self.persist(&record).await;
        metrics::record_task_completed();
        logger.log_completion(&format!("{} video(s) ready", record.outputs.videos.len()));
        record
    }

    /// Reject the job before any stage runs when a needed provider is missing.
    fn preflight(&self, job: &GenerateVideoJob) -> Result<(), (Stage, PipelineError)> {
        let params = &job.params;
        let reaches = |stage: Stage| job.stop_at.map_or(true, |stop| stage <= stop);
        let remote = params.video_source != VideoSource::Local;

        if self.providers.text.is_none() {
            if params.provided_script().is_none() {
                return Err((
                    Stage::Script,
                    PipelineError::configuration("no text generator configured for the script"),
                ));
            }
            if remote && reaches(Stage::Terms) && params.provided_terms().is_none() {
                return Err((
                    Stage::Terms,
                    PipelineError::configuration("no text generator configured for search terms"),
                ));
            }
        }

        if remote
            && reaches(Stage::Materials)
            && self.providers.search_for(params.video_source).is_none()
        {
            return Err((
                Stage::Materials,
                PipelineError::configuration(format!(
                    "no {} search provider configured",
                    params.video_source.as_str()
                )),
            ));
        }
        Ok(())
    }

    async fn run_stage(
        &self,
        stage: Stage,
        ctx: &mut RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        match stage {
            Stage::Script => self.script_stage(ctx, record).await,
            Stage::Terms => self.terms_stage(ctx, record).await,
            Stage::Audio => self.audio_stage(ctx, record).await,
            Stage::Subtitle => self.subtitle_stage(ctx, record).await,
            Stage::Materials => self.materials_stage(ctx, record).await,
            Stage::Assemble => self.assemble_stage(ctx, record).await,
        }
    }

    async fn script_stage(
        &self,
        ctx: &RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        let params = ctx.params;
        if let Some(script) = params.provided_script() {
            ctx.logger.log_progress("using provided script");
            record.outputs.script = Some(script.to_string());
            return Ok(());
        }

        let generator = self.text_generator()?;
        let script = retry_async_if(
            &self.script_retry,
            || {
                request_script(
                    generator,
                    &params.video_subject,
                    params.video_language.as_deref(),
                    params.paragraph_number,
                )
            },
            |e: &ProviderError| e.is_retryable() && !ctx.is_cancelled(),
        )
        .await
        .into_result()?;

        ctx.logger.log_progress(&format!("script ready ({} chars)", script.chars().count()));
        record.outputs.script = Some(script);
        Ok(())
    }

    async fn terms_stage(
        &self,
        ctx: &RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        let params = ctx.params;
        let script = required_script(record)?;

        if params.video_source == VideoSource::Local {
            ctx.logger.log_progress("local materials, skipping search terms");
        } else if let Some(terms) = params.provided_terms() {
            record.outputs.terms = terms;
        } else {
            let generator = self.text_generator()?;
            let amount = self.config.terms_amount;
            let policy = RetryPolicy {
                operation_name: "terms".to_string(),
                ..self.script_retry.clone()
            };
            let terms = retry_async_if(
                &policy,
                || request_terms(generator, &params.video_subject, &script, amount),
                |e: &ProviderError| e.is_retryable() && !ctx.is_cancelled(),
            )
            .await
            .into_result()?;
            record.outputs.terms = terms;
        }

        let script_data = json!({
            "script": script,
            "search_terms": record.outputs.terms,
            "params": params,
        });
        let path = ctx.task_dir.join("script.json");
        tokio::fs::write(&path, serde_json::to_vec_pretty(&script_data)?).await?;
        ctx.logger.log_progress(&format!("search terms: {:?}", record.outputs.terms));
        Ok(())
    }

    async fn audio_stage(
        &self,
        ctx: &mut RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        let params = ctx.params;
        let script = required_script(record)?;
        let output = ctx.task_dir.join("audio.mp3");

        let request = SpeechRequest::new(script, &params.voice_name).with_rate(params.voice_rate);
        let speech = self.providers.speech.synthesize(&request, &output).await?;

        let duration = speech.duration_seconds();
        if duration <= 0.0 {
            return Err(ProviderError::invalid_response(
                "speech synthesis produced no timing",
            )
            .into());
        }

        ctx.logger.log_progress(&format!("narration is {:.0}s", duration));
        record.outputs.audio_file = Some(speech.audio_file);
        record.outputs.audio_duration = Some(duration);
        ctx.timings = speech.timings;
        Ok(())
    }

    async fn subtitle_stage(
        &self,
        ctx: &RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        if !ctx.params.subtitle_enabled {
            ctx.logger.log_progress("subtitles disabled");
            return Ok(());
        }

        let path = ctx.task_dir.join("subtitle.srt");
        match self.build_subtitles(ctx, record, &path).await {
            Ok(lines) => {
                ctx.logger.log_progress(&format!("{} subtitle lines", lines));
                record.outputs.subtitle_path = Some(path);
            }
            Err(PipelineError::Cancelled) | Err(PipelineError::Media(MediaError::Cancelled)) => {
                return Err(PipelineError::Cancelled);
            }
            Err(e) => {
                ctx.logger.log_warning(&format!("continuing without subtitles: {}", e));
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        Ok(())
    }

    /// Forward alignment first when timing is available, then transcription.
    async fn build_subtitles(
        &self,
        ctx: &RunContext<'_>,
        record: &TaskRecord,
        path: &Path,
    ) -> PipelineResult<usize> {
        let script = required_script(record)?;

        if self.subtitle_provider == SubtitleProvider::Edge {
            match write_aligned_subtitles(&ctx.timings, &script, path).await {
                Ok(items) => return Ok(items.len()),
                Err(e) => {
                    ctx.logger
                        .log_warning(&format!("forward alignment failed, transcribing: {}", e));
                    metrics::record_subtitle_fallback();
                }
            }
        }

        let transcriber = self
            .providers
            .transcriber
            .as_ref()
            .ok_or_else(|| PipelineError::configuration("no transcriber configured"))?;
        let audio = record
            .outputs
            .audio_file
            .as_deref()
            .ok_or_else(|| PipelineError::Alignment("no narration to transcribe".to_string()))?;

        transcriber.transcribe(audio, path).await?;
        let corrected = correct_subtitle_file(path, &script).await?;
        if corrected.is_empty() {
            return Err(PipelineError::Alignment("transcription produced no lines".to_string()));
        }
        Ok(corrected.len())
    }

    async fn materials_stage(
        &self,
        ctx: &RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        let params = ctx.params;
        let audio_duration = record.outputs.audio_duration.unwrap_or_default();

        let (materials, required) = if params.video_source == VideoSource::Local {
            if params.video_materials.is_empty() {
                return Err(PipelineError::ResourceInsufficient {
                    required: audio_duration,
                    available: 0.0,
                });
            }
            let prepared = self
                .assembler
                .prepare_local(
                    &ctx.runner,
                    &params.video_materials,
                    params.max_clip_duration(),
                    &ctx.task_dir,
                    &ctx.encoding,
                )
                .await?;
            (prepared, audio_duration)
        } else {
            let required = target_duration(audio_duration, params.output_count());
            (self.download_materials(ctx, &record.outputs.terms, required).await?, required)
        };

        let available: f64 = materials.iter().map(|m| m.duration).sum();
        let count = materials.len();
        // Kept on failure too, so the record shows what was found
        record.outputs.materials = materials;
        if count == 0 || available < required {
            return Err(PipelineError::ResourceInsufficient {
                required,
                available,
            });
        }

        ctx.logger.log_progress(&format!(
            "{} materials covering {:.1}s of {:.1}s",
            count, available, required
        ));
        Ok(())
    }

    /// Search every term, then download candidates until `required` seconds are covered.
    async fn download_materials(
        &self,
        ctx: &RunContext<'_>,
        terms: &[String],
        required: f64,
    ) -> PipelineResult<Vec<MaterialInfo>> {
        let params = ctx.params;
        let search = self.providers.search_for(params.video_source).ok_or_else(|| {
            PipelineError::configuration(format!(
                "no {} search provider configured",
                params.video_source.as_str()
            ))
        })?;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for term in terms {
            ctx.ensure_active()?;
            let found = search
                .search(term, params.max_clip_duration(), params.video_aspect)
                .await;
            ctx.logger.log_progress(&format!("found {} videos for '{}'", found.len(), term));
            for material in found {
                if seen.insert(material.url.clone()) {
                    candidates.push(material.with_search_term(term));
                }
            }
        }

        if params.video_concat_mode == ConcatMode::Random {
            candidates.shuffle(&mut rand::rng());
        }

        let found_duration: f64 = candidates.iter().map(|m| m.duration).sum();
        if found_duration < required {
            ctx.logger.log_warning(&format!(
                "found {:.1}s of footage, {:.1}s required",
                found_duration, required
            ));
        }

        let mut downloaded = Vec::new();
        let mut covered = 0.0;
        for candidate in candidates {
            if covered >= required {
                break;
            }
            ctx.ensure_active()?;
            match self.fetcher.fetch(&candidate.url).await {
                Ok(cached) => {
                    // Search metadata is rounded; prefer the probed length
                    let mut material = candidate.with_local_path(cached.path);
                    if let Some(duration) = cached.duration {
                        material = material.with_duration(duration);
                    }
                    covered += material.duration;
                    metrics::record_material_downloaded();
                    downloaded.push(material);
                }
                Err(MediaError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    metrics::record_material_rejected();
                    ctx.logger
                        .log_warning(&format!("skipping material {}: {}", candidate.url, e));
                }
            }
        }
        Ok(downloaded)
    }

    async fn assemble_stage(
        &self,
        ctx: &RunContext<'_>,
        record: &mut TaskRecord,
    ) -> PipelineResult<()> {
        let params = ctx.params;
        let audio_duration = record.outputs.audio_duration.unwrap_or_default();
        let narration = record
            .outputs
            .audio_file
            .clone()
            .ok_or_else(|| PipelineError::encoding("narration missing"))?;

        let count = params.output_count();
        let step = 50.0 / count as f64 / 2.0;
        let mut progress = 50.0;

        let options = PackOptions {
            resolution: params.video_aspect.resolution(),
            max_clip_duration: params.max_clip_duration(),
            concat_mode: if count > 1 {
                ConcatMode::Random
            } else {
                params.video_concat_mode
            },
            transition_mode: params.video_transition_mode,
        };
        let bgm = self.select_bgm(params).await;
        let subtitles = record.outputs.subtitle_path.clone().map(|path| {
            (path, SubtitleStyle::from_params(params, self.config.fonts_dir.clone()))
        });

        record.outputs.combined_videos.clear();
        record.outputs.videos.clear();

        for i in 1..=count {
            ctx.ensure_active()?;

            let combined = ctx.task_dir.join(format!("combined-{}.mp4", i));
            let report = self
                .assembler
                .combine(
                    &ctx.runner,
                    &record.outputs.materials,
                    audio_duration,
                    options.clone(),
                    &ctx.encoding,
                    &combined,
                )
                .await?;
            ctx.logger.log_progress(&format!(
                "combined video {}/{}: {} segments, {:.1}s",
                i, count, report.encoded, report.duration
            ));
            record.outputs.combined_videos.push(combined.clone());
            progress += step;
            record.set_progress(progress as u8);
            self.persist(record).await;

            let output = ctx.task_dir.join(format!("final-{}.mp4", i));
            let request = ComposeRequest {
                video: combined,
                narration: narration.clone(),
                duration: audio_duration,
                voice_volume: params.voice_volume,
                bgm: bgm.clone(),
                bgm_volume: params.bgm_volume,
                subtitles: subtitles.clone(),
                resolution: options.resolution,
            };
            self.assembler
                .compose(&ctx.runner, &request, &ctx.encoding, &output)
                .await?;
            ctx.logger.log_progress(&format!("final video {}/{} ready", i, count));
            record.outputs.videos.push(output);
            progress += step;
            record.set_progress(progress as u8);
            self.persist(record).await;
        }
        Ok(())
    }

    /// Explicit file first, then a random track from the songs directory.
    async fn select_bgm(&self, params: &VideoParams) -> Option<PathBuf> {
        if params.bgm_type == BgmType::None {
            return None;
        }
        if let Some(file) = &params.bgm_file {
            if tokio::fs::try_exists(file).await.unwrap_or(false) {
                return Some(file.clone());
            }
        }
        if params.bgm_type != BgmType::Random {
            return None;
        }

        let dir = self.config.songs_dir.as_ref()?;
        let mut songs = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await.ok()?;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("mp3")) {
                songs.push(path);
            }
        }
        songs.choose(&mut rand::rng()).cloned()
    }

    fn text_generator(&self) -> PipelineResult<&dyn TextGenerator> {
        self.providers
            .text
            .as_deref()
            .ok_or_else(|| PipelineError::configuration("no text generator configured"))
    }

    async fn fail(
        &self,
        mut record: TaskRecord,
        logger: &TaskLogger,
        stage: Stage,
        error: PipelineError,
    ) -> TaskRecord {
        let kind = error.kind();
        logger.for_stage(stage).log_error(&format!("task failed: {}", error));
        record.fail(stage, kind, error.to_string());
        metrics::record_task_failed(stage, kind);
        self.persist(&record).await;
        record
    }

    async fn persist(&self, record: &TaskRecord) {
        if let Err(e) = self.store.set(record).await {
            tracing::warn!(task_id = %record.id, "Failed to persist task state: {}", e);
        }
    }
}

fn required_script(record: &TaskRecord) -> PipelineResult<String> {
    record
        .outputs
        .script
        .clone()
        .ok_or_else(|| PipelineError::configuration("script missing"))
}
