//! Observability surface: per-endpoint latency/error metrics, failover and
//! broadcast-retry counters, fee-estimate confidence gauge.
//!
//! Follows the shape of the prior `rpc_metrics` crate: a thin
//! wrapper over the `metrics` facade with a Prometheus pull exporter, plus
//! named helper functions instead of scattering metric-name string literals
//! across the rest of the crate.

use std::net::SocketAddr;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder and starts its pull HTTP listener.
/// Idempotent: later calls after the first are no-ops.
pub fn init(addr: SocketAddr) -> Result<(), String> {
    if HANDLE.get().is_some() {
        return Ok(());
    }
    let builder = PrometheusBuilder::new().with_http_listener(addr);
    let handle = builder
        .install_recorder()
        .map_err(|e| format!("failed to install prometheus recorder: {e}"))?;
    let _ = HANDLE.set(handle);
    Ok(())
}

/// Renders the current metric exposition body. Used by tests and by any
/// embedder that wants to serve the scrape endpoint itself.
pub fn gather() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

pub fn record_rpc_duration(chain: &str, endpoint: &str, method: &str, seconds: f64) {
    metrics::histogram!(
        "chainadapter_rpc_request_duration_seconds",
        "chain" => chain.to_string(),
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
    )
    .record(seconds);
}

pub fn record_rpc_error(chain: &str, endpoint: &str, error_kind: &str) {
    metrics::counter!(
        "chainadapter_rpc_errors_total",
        "chain" => chain.to_string(),
        "endpoint" => endpoint.to_string(),
        "error_kind" => error_kind.to_string(),
    )
    .increment(1);
}

pub fn record_failover(chain: &str) {
    metrics::counter!("chainadapter_failovers_total", "chain" => chain.to_string()).increment(1);
}

pub fn record_subscription_reconnect(chain: &str) {
    metrics::counter!("chainadapter_subscription_reconnects_total", "chain" => chain.to_string())
        .increment(1);
}

pub fn record_broadcast_retry(chain: &str, retry_count: u32) {
    metrics::histogram!("chainadapter_broadcast_retries", "chain" => chain.to_string())
        .record(retry_count as f64);
}

pub fn record_fee_confidence(chain: &str, confidence: u8) {
    metrics::gauge!("chainadapter_fee_estimate_confidence", "chain" => chain.to_string())
        .set(confidence as f64);
}
