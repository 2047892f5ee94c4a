//! Prometheus metrics for the worker.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};

use crate::error::{WorkerError, WorkerResult};

/// Metric names as constants for consistency.
pub mod names {
    // Job metrics
    pub const JOBS_COMPLETED_TOTAL: &str = "vfilter_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vfilter_jobs_failed_total";
    pub const JOB_DURATION_SECONDS: &str = "vfilter_job_duration_seconds";

    // Unit metrics
    pub const UNIT_DURATION_SECONDS: &str = "vfilter_unit_duration_seconds";
    pub const CHUNKS_PER_JOB: &str = "vfilter_chunks_per_job";
    pub const CHUNKS_FAILED_TOTAL: &str = "vfilter_chunks_failed_total";

    // Emitted by the media and separation crates
    pub const FFMPEG_DURATION_SECONDS: &str = "vfilter_ffmpeg_duration_seconds";
    pub const SEPARATION_DURATION_SECONDS: &str = "vfilter_separation_duration_seconds";
    pub const MODEL_LOADS_TOTAL: &str = "vfilter_model_loads_total";
}

/// Serve `/metrics` on `0.0.0.0:port`.
///
/// Must be called from inside a tokio runtime.
pub fn init_metrics(port: u16) -> WorkerResult<()> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| WorkerError::config_error(format!("metrics listener on {}: {}", addr, e)))
}

/// Record job completed.
pub fn record_job_completed(mode: &str, duration_secs: f64) {
    let labels = [("mode", mode.to_string())];
    counter!(names::JOBS_COMPLETED_TOTAL, &labels).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record job failed.
pub fn record_job_failed(mode: &str, kind: &str) {
    let labels = [("mode", mode.to_string()), ("kind", kind.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record one unit run through the extract/isolate/remux pipeline.
pub fn record_unit_duration(duration_secs: f64) {
    histogram!(names::UNIT_DURATION_SECONDS).record(duration_secs);
}

pub fn record_chunk_count(count: usize) {
    histogram!(names::CHUNKS_PER_JOB).record(count as f64);
}

pub fn record_chunk_failed() {
    counter!(names::CHUNKS_FAILED_TOTAL).increment(1);
}
