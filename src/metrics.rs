//! Prometheus metrics.
//!
//! The exporter runs its own HTTP listener on `METRICS_PORT`. Recording
//! functions are safe to call without an installed recorder (they become
//! no-ops), so unit tests and metrics-disabled deployments need no setup.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `taskboard_task_mutations_total{action}`
//! - `taskboard_audit_writes_total{status}` - success / failure
//! - `taskboard_rate_limit_rejections_total{scope}` - read / write
//! - `taskboard_threats_total{outcome}` - flagged / blocked / banned
//! - `taskboard_store_failures_total{component}` - fail-open store errors
//!
//! ## Histograms
//! - `taskboard_request_duration_seconds{endpoint,method,status}`
//!
//! ## Gauges
//! - `taskboard_audit_store_up` - 1 = reachable, 0 = down

use std::net::SocketAddr;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};

use crate::models::TaskAction;

pub mod names {
    pub const TASK_MUTATIONS_TOTAL: &str = "taskboard_task_mutations_total";
    pub const AUDIT_WRITES_TOTAL: &str = "taskboard_audit_writes_total";
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "taskboard_rate_limit_rejections_total";
    pub const THREATS_TOTAL: &str = "taskboard_threats_total";
    pub const STORE_FAILURES_TOTAL: &str = "taskboard_store_failures_total";
    pub const REQUEST_DURATION_SECONDS: &str = "taskboard_request_duration_seconds";
    pub const AUDIT_STORE_UP: &str = "taskboard_audit_store_up";
}

/// Install the Prometheus exporter and describe every metric.
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::TASK_MUTATIONS_TOTAL,
        "Task mutations committed, by action"
    );
    describe_counter!(
        names::AUDIT_WRITES_TOTAL,
        "Audit log writes, by outcome"
    );
    describe_counter!(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        "Requests rejected by the rate limiter"
    );
    describe_counter!(
        names::THREATS_TOTAL,
        "Requests flagged or rejected by the SQL injection guard"
    );
    describe_counter!(
        names::STORE_FAILURES_TOTAL,
        "Counter store failures that were ignored (fail open)"
    );
    describe_histogram!(
        names::REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_gauge!(
        names::AUDIT_STORE_UP,
        "Audit log store reachability (1 = up, 0 = down)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Like [`init_metrics`], but only logs on failure.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

pub fn record_task_mutation(action: TaskAction) {
    counter!(names::TASK_MUTATIONS_TOTAL, "action" => action.as_str()).increment(1);
}

pub fn record_audit_write(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!(names::AUDIT_WRITES_TOTAL, "status" => status).increment(1);
}

pub fn record_rate_limit_rejection(scope: &'static str) {
    counter!(names::RATE_LIMIT_REJECTIONS_TOTAL, "scope" => scope).increment(1);
}

/// `outcome` is `flagged`, `blocked` or `banned`.
pub fn record_threat(outcome: &'static str) {
    counter!(names::THREATS_TOTAL, "outcome" => outcome).increment(1);
}

pub fn record_store_failure(component: &'static str) {
    counter!(names::STORE_FAILURES_TOTAL, "component" => component).increment(1);
}

pub fn record_request_duration(endpoint: &str, method: &str, status: &str, duration_secs: f64) {
    histogram!(names::REQUEST_DURATION_SECONDS, "endpoint" => endpoint.to_string(), "method" => method.to_string(), "status" => status.to_string())
        .record(duration_secs);
}

pub fn set_audit_store_up(up: bool) {
    gauge!(names::AUDIT_STORE_UP).set(if up { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    // Without an installed recorder every call must be a silent no-op

    #[test]
    fn test_counters_without_recorder() {
        record_task_mutation(TaskAction::Created);
        record_audit_write(true);
        record_audit_write(false);
        record_rate_limit_rejection("write");
        record_threat("blocked");
        record_store_failure("rate_limit");
    }

    #[test]
    fn test_histogram_and_gauge_without_recorder() {
        record_request_duration("/api/tasks", "GET", "200", 0.012);
        set_audit_store_up(true);
        set_audit_store_up(false);
    }
}
