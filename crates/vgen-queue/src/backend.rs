//! FIFO queue backends.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use vgen_models::TaskId;

use crate::error::{QueueError, QueueResult};
use crate::job::QueuedJob;

/// Where waiting jobs are kept.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Append a job to the tail.
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<()>;

    /// Pop the head, if any.
    async fn dequeue(&self) -> QueueResult<Option<QueuedJob>>;

    /// Number of waiting jobs.
    async fn len(&self) -> QueueResult<usize>;

    /// Whether a job for `task_id` is waiting.
    async fn contains(&self, task_id: &TaskId) -> QueueResult<bool>;

    async fn is_empty(&self) -> QueueResult<bool> {
        Ok(self.len().await? == 0)
    }
}

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    #[default]
    Memory,
    Redis,
}

impl FromStr for BackendKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "memory" => Ok(BackendKind::Memory),
            "redis" => Ok(BackendKind::Redis),
            other => Err(QueueError::UnknownBackend(other.to_string())),
        }
    }
}

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub backend: BackendKind,
    /// Redis URL
    pub redis_url: String,
    /// List holding waiting jobs
    pub queue_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            queue_key: "vgen:tasks".to_string(),
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Ok(Self {
            backend: std::env::var("QUEUE_BACKEND").unwrap_or_default().parse()?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            queue_key: std::env::var("QUEUE_KEY").unwrap_or_else(|_| "vgen:tasks".to_string()),
        })
    }
}

/// Build the configured backend.
pub fn create_backend(config: &QueueConfig) -> QueueResult<Arc<dyn QueueBackend>> {
    let backend: Arc<dyn QueueBackend> = match config.backend {
        BackendKind::Memory => Arc::new(MemoryQueue::new()),
        BackendKind::Redis => Arc::new(RedisQueue::new(&config.redis_url, &config.queue_key)?),
    };
    Ok(backend)
}

/// In-process queue for a single node.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    jobs: Mutex<VecDeque<QueuedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<()> {
        self.jobs.lock().await.push_back(job.clone());
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueuedJob>> {
        Ok(self.jobs.lock().await.pop_front())
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.jobs.lock().await.len())
    }

    async fn contains(&self, task_id: &TaskId) -> QueueResult<bool> {
        Ok(self.jobs.lock().await.iter().any(|j| j.task_id() == task_id))
    }
}

/// Redis list shared by several nodes (`RPUSH` / `LPOP`).
pub struct RedisQueue {
    client: redis::Client,
    key: String,
}

impl RedisQueue {
    pub fn new(redis_url: &str, key: impl Into<String>) -> QueueResult<Self> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            key: key.into(),
        })
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl QueueBackend for RedisQueue {
    async fn enqueue(&self, job: &QueuedJob) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;
        let _: () = conn
            .rpush(&self.key, payload)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;
        debug!("Enqueued {} to {}", job.task_id(), self.key);
        Ok(())
    }

    async fn dequeue(&self) -> QueueResult<Option<QueuedJob>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn
            .lpop(&self.key, None)
            .await
            .map_err(|e| QueueError::DequeueFailed(e.to_string()))?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.connection().await?;
        Ok(conn.llen(&self.key).await?)
    }

    async fn contains(&self, task_id: &TaskId) -> QueueResult<bool> {
        let mut conn = self.connection().await?;
        let payloads: Vec<String> = conn.lrange(&self.key, 0, -1).await?;
        Ok(payloads.iter().any(|p| match serde_json::from_str::<QueuedJob>(p) {
            Ok(job) => job.task_id() == task_id,
            Err(e) => {
                warn!("Skipping unreadable queue entry: {}", e);
                false
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::GenerateVideoJob;
    use vgen_models::VideoParams;

    fn job(id: &str) -> QueuedJob {
        GenerateVideoJob::new(VideoParams::new("s"))
            .with_task_id(TaskId::from_string(id))
            .into()
    }

    #[tokio::test]
    async fn test_memory_queue_is_fifo() {
        let queue = MemoryQueue::new();
        assert!(queue.is_empty().await.unwrap());

        queue.enqueue(&job("a")).await.unwrap();
        queue.enqueue(&job("b")).await.unwrap();
        assert_eq!(queue.len().await.unwrap(), 2);

        assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id().as_str(), "a");
        assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id().as_str(), "b");
        assert!(queue.dequeue().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_queue_contains() {
        let queue = MemoryQueue::new();
        queue.enqueue(&job("a")).await.unwrap();

        assert!(queue.contains(&TaskId::from_string("a")).await.unwrap());
        assert!(!queue.contains(&TaskId::from_string("b")).await.unwrap());

        queue.dequeue().await.unwrap();
        assert!(!queue.contains(&TaskId::from_string("a")).await.unwrap());
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert_eq!("Redis".parse::<BackendKind>().unwrap(), BackendKind::Redis);
        assert!(matches!(
            "kafka".parse::<BackendKind>(),
            Err(QueueError::UnknownBackend(_))
        ));
    }

    #[test]
    fn test_create_redis_backend_rejects_bad_url() {
        let config = QueueConfig {
            backend: BackendKind::Redis,
            redis_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(create_backend(&config).is_err());
    }
}
