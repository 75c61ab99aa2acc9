//! Idempotent material downloads into a local cache.
//!
//! Files are keyed by a hash of the URL without its query string, so repeated
//! requests for the same footage (even with rotating signed parameters) hit
//! the cache. Every fresh download goes to a uniquely named temporary file,
//! is validated with ffprobe and only then moved into place, so concurrent
//! tasks fetching the same URL never share a partial file.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::probe::{probe_duration, probe_video};

/// Default timeout for a single material download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(240);

/// A material file in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedMaterial {
    pub path: PathBuf,
    /// Length measured by ffprobe, when it could be read
    pub duration: Option<f64>,
}

/// Downloads remote footage into a cache directory.
#[derive(Debug, Clone)]
pub struct MaterialDownloader {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl MaterialDownloader {
    /// Create a downloader with its own HTTP client.
    pub fn new(cache_dir: impl Into<PathBuf>) -> MediaResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, cache_dir))
    }

    pub fn with_client(client: reqwest::Client, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Where `url` is stored in the cache.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("vid-{}.mp4", url_hash(url)))
    }

    /// Download `url` unless a non-empty cached copy exists.
    ///
    /// A fresh download that ffprobe cannot read, or that reports no duration or
    /// frame rate, is deleted and reported as [`MediaError::InvalidVideo`].
    pub async fn download(&self, url: &str) -> MediaResult<CachedMaterial> {
        let path = self.cache_path(url);
        if is_non_empty_file(&path).await {
            debug!("Material already cached: {}", path.display());
            let duration = probe_duration(&path).await.ok().filter(|d| *d > 0.0);
            return Ok(CachedMaterial { path, duration });
        }

        tokio::fs::create_dir_all(&self.cache_dir).await?;
        // Removed on drop unless persisted
        let partial = tempfile::Builder::new()
            .prefix("vid-")
            .suffix(".part")
            .tempfile_in(&self.cache_dir)?;
        let started = Instant::now();

        self.fetch_to(url, &partial).await?;

        let duration = match probe_video(partial.path()).await {
            Ok(info) if info.is_playable() => info.duration,
            Ok(info) => {
                return Err(MediaError::invalid_video(format!(
                    "{} has duration {:.2}s and fps {:.2}",
                    url, info.duration, info.fps
                )));
            }
            Err(e) => return Err(MediaError::invalid_video(format!("{}: {}", url, e))),
        };

        if persist_into_cache(partial, &path)? {
            metrics::histogram!("vgen_download_duration_seconds")
                .record(started.elapsed().as_secs_f64());
            info!("Downloaded material {} -> {}", url, path.display());
        } else {
            debug!("Material cached concurrently: {}", path.display());
        }
        Ok(CachedMaterial {
            path,
            duration: Some(duration),
        })
    }

    async fn fetch_to(&self, url: &str, partial: &NamedTempFile) -> MediaResult<()> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(MediaError::download_failed(format!(
                "HTTP {}: {}",
                response.status(),
                url
            )));
        }

        let mut file = tokio::fs::File::from_std(partial.as_file().try_clone()?);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            warn!("Empty response body for {}", url);
            return Err(MediaError::download_failed(format!("empty body: {}", url)));
        }
        Ok(())
    }
}

/// Move a validated download to `path` without replacing an existing file.
///
/// Returns `false` when another download already put the file in place; the
/// temporary copy is discarded in that case.
fn persist_into_cache(partial: NamedTempFile, path: &Path) -> MediaResult<bool> {
    match partial.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error.into()),
    }
}

/// Hex SHA-256 of the URL with query and fragment removed.
pub fn url_hash(url: &str) -> String {
    let stripped = match url::Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
    };
    format!("{:x}", Sha256::digest(stripped.as_bytes()))
}

async fn is_non_empty_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
