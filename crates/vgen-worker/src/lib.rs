//! Video generation worker.
//!
//! This crate provides:
//! - The staged generation pipeline (script, terms, audio, subtitles, materials, assembly)
//! - Job dispatch from the task manager into the pipeline, with cancellation and timeouts
//! - Bounded retries for provider calls
//! - Structured task logging and Prometheus metrics

pub mod config;
pub mod error;
pub mod executor;
pub mod handler;
pub mod logging;
pub mod media;
pub mod metrics;
pub mod pipeline;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::WorkerConfig;
pub use error::{PipelineError, PipelineResult};
pub use executor::Worker;
pub use handler::PipelineHandler;
pub use logging::TaskLogger;
pub use media::{Assembler, FfmpegAssembler, MaterialFetch};
pub use pipeline::{Pipeline, Providers};
pub use retry::{retry_async, retry_async_if, RetryPolicy, RetryResult};
