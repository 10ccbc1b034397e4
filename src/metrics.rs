use axum::{routing::get, Router};
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const ROWS_SCORED: &str = "branch_risk_rows_scored_total";
pub const BATCHES_REJECTED: &str = "branch_risk_batches_rejected_total";
pub const MODEL_INFO: &str = "branch_risk_model_info";

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and publish which calibration is live.
    pub fn init(model_fingerprint: &str) -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new().install_recorder()?;

        gauge!(MODEL_INFO, "fingerprint" => model_fingerprint.to_string()).set(1.0);

        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

/// Counters are no-ops until a recorder is installed.
pub(crate) fn record_scored(rows: usize) {
    counter!(ROWS_SCORED).increment(rows as u64);
}

pub(crate) fn record_rejected(reason: &'static str) {
    counter!(BATCHES_REJECTED, "reason" => reason).increment(1);
}
