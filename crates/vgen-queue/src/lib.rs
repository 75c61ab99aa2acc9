//! Task scheduling for the video generation pipeline.
//!
//! This crate provides:
//! - A bounded-concurrency [`TaskManager`] with FIFO admission
//! - Queue backends: in-memory and Redis lists
//! - Task state storage: in-memory and Redis
//! - The closed set of job kinds ([`QueuedJob`])

pub mod backend;
pub mod error;
pub mod job;
pub mod manager;
pub mod state;

pub use backend::{create_backend, BackendKind, MemoryQueue, QueueBackend, QueueConfig, RedisQueue};
pub use error::{QueueError, QueueResult};
pub use job::{GenerateVideoJob, QueuedJob};
pub use manager::{JobHandler, JobOutcome, TaskManager};
pub use state::{create_state_store, MemoryStateStore, RedisStateStore, StateStore};
