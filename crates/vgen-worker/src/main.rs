//! Video generation worker binary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vgen_media::{check_ffmpeg, check_ffprobe, MaterialDownloader};
use vgen_models::{Stage, TaskState, VideoParams, VideoSource};
use vgen_providers::{
    create_material_search, create_text_generator, EdgeTtsSynthesizer, ProviderConfig,
    WhisperCliTranscriber,
};
use vgen_queue::{create_backend, create_state_store, QueueConfig};
use vgen_worker::metrics::init_metrics;
use vgen_worker::{FfmpegAssembler, Pipeline, Providers, Worker, WorkerConfig};

#[derive(Debug, Parser)]
#[command(name = "vgen-worker", version, about = "Generate short videos from a subject")]
struct Cli {
    /// JSON files with video parameters. Without any, the worker serves the shared queue.
    params: Vec<PathBuf>,

    /// Finish successfully after this stage
    #[arg(long, value_name = "STAGE")]
    stop_at: Option<Stage>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("failed to install rustls crypto provider"))?;

    dotenvy::dotenv().ok();
    init_tracing()?;

    let cli = Cli::parse();
    info!("Starting vgen-worker");

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);
    let queue_config = QueueConfig::from_env()?;
    let provider_config = ProviderConfig::from_env()?;

    if let Some(addr) = config.metrics_addr {
        init_metrics(addr).context("failed to start metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    for check in [check_ffmpeg(), check_ffprobe()] {
        if let Err(e) = check {
            warn!("{}; encoding stages will fail", e);
        }
    }

    let providers = build_providers(&provider_config);
    let store = create_state_store(config.state_backend, &queue_config)?;
    let backend = create_backend(&queue_config)?;
    let fetcher = Arc::new(MaterialDownloader::new(config.cache_dir())?);

    let pipeline = Pipeline::new(
        config.clone(),
        providers,
        store,
        fetcher,
        Arc::new(FfmpegAssembler),
    )
    .with_subtitle_provider(provider_config.subtitle_provider);
    let worker = Worker::new(Arc::new(pipeline), backend);

    if cli.params.is_empty() {
        serve(&worker, &config).await;
    } else {
        run_files(&worker, &cli).await?;
    }

    info!("Worker shutdown complete");
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("vgen=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
    Ok(())
}

/// Select every provider once. Missing credentials disable a provider; tasks
/// that need it fail with a configuration error.
fn build_providers(config: &ProviderConfig) -> Providers {
    let mut providers = Providers::new(Arc::new(EdgeTtsSynthesizer::new(&config.edge_tts_bin)))
        .with_transcriber(Arc::new(WhisperCliTranscriber::new(
            &config.whisper_bin,
            &config.whisper_model,
        )));

    match create_text_generator(&config.llm) {
        Ok(generator) => {
            info!("Text generation via {}", generator.name());
            providers = providers.with_text(generator);
        }
        Err(e) => warn!("Text generation disabled: {}", e),
    }

    for source in [VideoSource::Pexels, VideoSource::Pixabay] {
        match create_material_search(source, config) {
            Ok(Some(search)) => providers = providers.with_search(source, search),
            Ok(None) => {}
            Err(e) => info!("{} search disabled: {}", source.as_str(), e),
        }
    }
    providers
}

/// Generate one task per parameter file and wait for all of them.
async fn run_files(worker: &Worker, cli: &Cli) -> anyhow::Result<()> {
    let mut submitted = Vec::with_capacity(cli.params.len());
    for path in &cli.params {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let params: VideoParams = serde_json::from_str(&raw)
            .with_context(|| format!("invalid video parameters in {}", path.display()))?;
        let task_id = worker.submit(params, cli.stop_at).await?;
        submitted.push(task_id);
    }

    tokio::select! {
        _ = worker.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal, cancelling {} task(s)", submitted.len());
            for task_id in &submitted {
                worker.cancel(task_id).await;
            }
            worker.wait_idle().await;
        }
    }

    let mut failed = 0;
    for task_id in &submitted {
        let Some(record) = worker.status(task_id).await? else {
            continue;
        };
        match (&record.state, &record.failure) {
            (TaskState::Complete, _) => {
                info!(task_id = %task_id, videos = ?record.outputs.videos, "Task complete");
            }
            (_, Some(failure)) => {
                failed += 1;
                error!(
                    task_id = %task_id,
                    stage = %failure.stage,
                    "Task failed: {}",
                    failure.message
                );
            }
            _ => {}
        }
    }

    if failed > 0 {
        return Err(anyhow!("{} of {} task(s) failed", failed, submitted.len()));
    }
    Ok(())
}

/// Admit jobs from the shared queue until interrupted.
async fn serve(worker: &Worker, config: &WorkerConfig) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_handle = tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Received shutdown signal");
        let _ = shutdown_tx.send(true);
    });

    worker.run(config.poll_interval, shutdown_rx).await;
    shutdown_handle.await.ok();

    // Stop admitting, only drain what is already running
    let drained = async {
        while worker.manager().running_count().await > 0 {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drained)
        .await
        .is_err()
    {
        warn!(
            "Running tasks did not finish within {:?}",
            config.shutdown_timeout
        );
    }
}
