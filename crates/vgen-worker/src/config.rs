//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use vgen_models::TaskId;
use vgen_queue::BackendKind;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrent pipeline runs
    pub max_concurrent_jobs: usize,
    /// Root for task directories and the material cache
    pub work_dir: PathBuf,
    /// Optional wall-clock limit per task
    pub task_timeout: Option<Duration>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// How often an idle worker polls a shared queue
    pub poll_interval: Duration,
    /// Background music directory for `bgm_type = random`
    pub songs_dir: Option<PathBuf>,
    /// Fonts used for burnt-in subtitles
    pub fonts_dir: Option<PathBuf>,
    /// Attempts for script generation
    pub script_attempts: u32,
    /// Number of search terms requested from the generator
    pub terms_amount: usize,
    /// Where task records live
    pub state_backend: BackendKind,
    /// Prometheus listener, disabled when unset
    pub metrics_addr: Option<SocketAddr>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            work_dir: PathBuf::from("/tmp/vgen"),
            task_timeout: None,
            shutdown_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            songs_dir: None,
            fonts_dir: None,
            script_attempts: 5,
            terms_amount: 5,
            state_backend: BackendKind::Memory,
            metrics_addr: None,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("/tmp/vgen")),
            task_timeout: std::env::var("WORKER_TASK_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            poll_interval: Duration::from_secs(
                std::env::var("WORKER_POLL_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            songs_dir: std::env::var("WORKER_SONGS_DIR").ok().map(PathBuf::from),
            fonts_dir: std::env::var("WORKER_FONTS_DIR").ok().map(PathBuf::from),
            script_attempts: std::env::var("WORKER_SCRIPT_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            terms_amount: std::env::var("WORKER_TERMS_AMOUNT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            state_backend: std::env::var("STATE_BACKEND")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.work_dir.join("tasks")
    }

    /// Directory owned by one task.
    pub fn task_dir(&self, id: &TaskId) -> PathBuf {
        self.tasks_dir().join(id.as_str())
    }

    /// Shared download cache.
    pub fn cache_dir(&self) -> PathBuf {
        self.work_dir.join("cache_videos")
    }
}
