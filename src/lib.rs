// src/lib.rs
// Public library surface for the service binaries and integration tests.

pub mod api;
pub mod columns;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod features;
pub mod metrics;
pub mod model;
pub mod report;
pub mod scorer;
pub mod segment;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::EngineConfig;
pub use crate::dataset::Dataset;
pub use crate::engine::{ClusterEngine, ScoredBatch};
pub use crate::features::{CoercionPolicy, ExtractError, FeatureVector, MissingColumnsError};
pub use crate::model::{ClusterModel, LinearModel};
pub use crate::scorer::{ProbabilityTriple, Scorer};
pub use crate::segment::ClusterLabel;

use axum::Router;
use tracing::info;

/// Build the full HTTP app from a resolved config.
///
/// Installs the Prometheus recorder when `cfg.metrics` is set; that can only
/// happen once per process.
pub fn app(cfg: &EngineConfig) -> anyhow::Result<Router> {
    let engine = ClusterEngine::from_config(cfg)?;
    let fingerprint = engine.model().fingerprint();
    let router = create_router(AppState::new(engine));

    if cfg.metrics {
        let m = crate::metrics::Metrics::init(&fingerprint)?;
        info!("prometheus exporter enabled at /metrics");
        return Ok(router.merge(m.router()));
    }
    Ok(router)
}
