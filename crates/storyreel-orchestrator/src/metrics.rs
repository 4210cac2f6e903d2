//! Pipeline metrics.
//!
//! Counters and histograms are recorded through the `metrics` facade; the
//! binary installs a Prometheus exporter when `METRICS_ADDR` is set.

use std::net::SocketAddr;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use storyreel_models::{FailureKind, Phase};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Metric name constants for consistency.
pub mod names {
    /// Stage executions started, by phase.
    pub const PHASE_ATTEMPTS_TOTAL: &str = "storyreel_phase_attempts_total";

    /// Item failures, by phase and failure kind.
    pub const ITEM_FAILURES_TOTAL: &str = "storyreel_item_failures_total";

    pub const BATCHES_SUBMITTED_TOTAL: &str = "storyreel_batches_submitted_total";

    /// Batch polls, by outcome.
    pub const BATCH_POLLS_TOTAL: &str = "storyreel_batch_polls_total";

    /// Items that reached a terminal state, by outcome.
    pub const ITEMS_FINISHED_TOTAL: &str = "storyreel_items_finished_total";

    /// Stage duration in seconds, by phase.
    pub const PHASE_SECONDS: &str = "storyreel_phase_seconds";
}

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) -> OrchestratorResult<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| OrchestratorError::Metrics(e.to_string()))
}

pub fn record_phase_attempt(phase: Phase) {
    counter!(names::PHASE_ATTEMPTS_TOTAL, "phase" => phase.as_str()).increment(1);
}

pub fn record_phase_duration(phase: Phase, secs: f64) {
    histogram!(names::PHASE_SECONDS, "phase" => phase.as_str()).record(secs);
}

pub fn record_item_failure(phase: Phase, kind: FailureKind) {
    counter!(
        names::ITEM_FAILURES_TOTAL,
        "phase" => phase.as_str(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub fn record_batch_submitted(provider: &str) {
    counter!(names::BATCHES_SUBMITTED_TOTAL, "provider" => provider.to_string()).increment(1);
}

pub fn record_batch_poll(outcome: &'static str) {
    counter!(names::BATCH_POLLS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_item_finished(outcome: &'static str) {
    counter!(names::ITEMS_FINISHED_TOTAL, "outcome" => outcome).increment(1);
}
