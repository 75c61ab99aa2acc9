//! Prometheus metrics for the worker.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use vgen_models::{FailureKind, Stage};

/// Metric names as constants for consistency.
pub mod names {
    pub const TASKS_SUBMITTED_TOTAL: &str = "vgen_tasks_submitted_total";
    pub const TASKS_COMPLETED_TOTAL: &str = "vgen_tasks_completed_total";
    pub const TASKS_FAILED_TOTAL: &str = "vgen_tasks_failed_total";
    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";
    pub const MATERIALS_DOWNLOADED_TOTAL: &str = "vgen_materials_downloaded_total";
    pub const MATERIALS_REJECTED_TOTAL: &str = "vgen_materials_rejected_total";
    pub const SUBTITLE_FALLBACK_TOTAL: &str = "vgen_subtitle_fallback_total";
}

/// Serve metrics on `addr` at `/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()
}

pub fn record_task_submitted() {
    counter!(names::TASKS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_task_completed() {
    counter!(names::TASKS_COMPLETED_TOTAL).increment(1);
}

pub fn record_task_failed(stage: Stage, kind: FailureKind) {
    let labels = [
        ("stage", stage.as_str().to_string()),
        ("kind", format!("{:?}", kind).to_lowercase()),
    ];
    counter!(names::TASKS_FAILED_TOTAL, &labels).increment(1);
}

pub fn record_stage_duration(stage: Stage, duration_secs: f64) {
    let labels = [("stage", stage.as_str().to_string())];
    histogram!(names::STAGE_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn record_material_downloaded() {
    counter!(names::MATERIALS_DOWNLOADED_TOTAL).increment(1);
}

pub fn record_material_rejected() {
    counter!(names::MATERIALS_REJECTED_TOTAL).increment(1);
}

pub fn record_subtitle_fallback() {
    counter!(names::SUBTITLE_FALLBACK_TOTAL).increment(1);
}
