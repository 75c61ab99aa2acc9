//! Task state storage.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;

use vgen_models::{TaskId, TaskRecord};

use crate::backend::{BackendKind, QueueConfig};
use crate::error::{QueueError, QueueResult};

/// Readable by anyone, written by the pipeline run that owns the task.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>>;

    async fn set(&self, record: &TaskRecord) -> QueueResult<()>;

    async fn delete(&self, id: &TaskId) -> QueueResult<()>;
}

/// Build the state store selected by `STATE_BACKEND`.
pub fn create_state_store(
    kind: BackendKind,
    config: &QueueConfig,
) -> QueueResult<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match kind {
        BackendKind::Memory => Arc::new(MemoryStateStore::new()),
        BackendKind::Redis => Arc::new(RedisStateStore::new(&config.redis_url)?),
    };
    Ok(store)
}

/// State kept in process memory.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    records: RwLock<HashMap<TaskId, TaskRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn set(&self, record: &TaskRecord) -> QueueResult<()> {
        self.records
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> QueueResult<()> {
        self.records.write().await.remove(id);
        Ok(())
    }
}

/// State kept as JSON under `vgen:task:{id}`.
pub struct RedisStateStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStateStore {
    pub fn new(redis_url: &str) -> QueueResult<Self> {
        Ok(Self {
            client: redis::Client::open(redis_url)?,
            prefix: "vgen:task".to_string(),
        })
    }

    pub fn key(&self, id: &TaskId) -> String {
        format!("{}:{}", self.prefix, id)
    }

    async fn connection(&self) -> QueueResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn get(&self, id: &TaskId) -> QueueResult<Option<TaskRecord>> {
        let mut conn = self.connection().await?;
        let payload: Option<String> = conn.get(self.key(id)).await?;
        match payload {
            Some(p) => Ok(Some(serde_json::from_str(&p)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, record: &TaskRecord) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)?;
        let _: () = conn.set(self.key(&record.id), payload).await?;
        Ok(())
    }

    async fn delete(&self, id: &TaskId) -> QueueResult<()> {
        let mut conn = self.connection().await?;
        let _: () = conn.del(self.key(id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vgen_models::{MaterialInfo, Stage, TaskState};

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryStateStore::new();
        let id = TaskId::from_string("t-1");
        assert!(store.get(&id).await.unwrap().is_none());

        let mut record = TaskRecord::new(id.clone());
        record.set_progress(30);
        record
            .outputs
            .materials
            .push(MaterialInfo::remote("pexels", "https://v/1.mp4", 8.0));
        store.set(&record).await.unwrap();

        let loaded = store.get(&id).await.unwrap().unwrap();
        assert_eq!(loaded, record);

        store.delete(&id).await.unwrap();
        assert!(store.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let store = MemoryStateStore::new();
        let mut record = TaskRecord::new(TaskId::from_string("t-2"));
        store.set(&record).await.unwrap();

        record.fail(Stage::Audio, vgen_models::FailureKind::Provider, "tts down");
        store.set(&record).await.unwrap();

        let loaded = store.get(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, TaskState::Failed);
    }

    #[test]
    fn test_redis_key_layout() {
        let store = RedisStateStore::new("redis://localhost:6379").unwrap();
        assert_eq!(store.key(&TaskId::from_string("abc")), "vgen:task:abc");
    }
}
