//! Redis backend tests. Run with a local server:
//! `REDIS_URL=redis://localhost:6379 cargo test -p vgen-queue -- --ignored`

use vgen_models::{TaskId, TaskRecord, VideoParams};
use vgen_queue::{GenerateVideoJob, QueueBackend, RedisQueue, RedisStateStore, StateStore};

fn redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_queue_fifo() {
    let key = format!("vgen:test:{}", TaskId::new());
    let queue = RedisQueue::new(&redis_url(), key).unwrap();

    for id in ["a", "b"] {
        let job = GenerateVideoJob::new(VideoParams::new("s")).with_task_id(TaskId::from_string(id));
        queue.enqueue(&job.into()).await.unwrap();
    }
    assert_eq!(queue.len().await.unwrap(), 2);
    assert!(queue.contains(&TaskId::from_string("b")).await.unwrap());
    assert!(!queue.contains(&TaskId::from_string("c")).await.unwrap());

    assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id().as_str(), "a");
    assert_eq!(queue.dequeue().await.unwrap().unwrap().task_id().as_str(), "b");
    assert!(queue.dequeue().await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_state_store() {
    let store = RedisStateStore::new(&redis_url()).unwrap();
    let mut record = TaskRecord::new(TaskId::new());
    record.set_progress(40);

    store.set(&record).await.unwrap();
    assert_eq!(store.get(&record.id).await.unwrap(), Some(record.clone()));

    store.delete(&record.id).await.unwrap();
    assert!(store.get(&record.id).await.unwrap().is_none());
}
