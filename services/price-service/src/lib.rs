//! House price prediction service: fetches the forest artifact on demand,
//! maps it once, and serves predictions over HTTP.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

pub mod artifact;
pub mod config;
pub mod error;
pub mod features;
pub mod http;
pub mod inference;
pub mod loader;
pub mod metrics;
pub mod model;

pub use config::ServiceConfig;
pub use inference::{PredictionResult, PredictionService};
pub use loader::ArtifactLoader;

/// Wires fetcher, loader and predictor from `cfg`.
pub fn build_predictor(cfg: &ServiceConfig) -> Result<PredictionService> {
    let descriptor = cfg.descriptor()?;
    let fetcher = artifact::ArtifactFetcher::new(cfg.fetch_settings()).context("building artifact fetcher")?;
    let loader = ArtifactLoader::new(descriptor, Arc::new(fetcher), Arc::new(model::ForestDecoder::default()));
    Ok(PredictionService::new(loader))
}

/// Serves until a shutdown signal, then releases the model.
pub async fn run(cfg: ServiceConfig) -> Result<()> {
    let predictor = build_predictor(&cfg)?;
    let loader = predictor.loader().clone();
    loader.initialize(cfg.model.warm_on_start);

    let app = http::router(http::AppState { predictor }, http::cors_layer(&cfg.cors.allowed_origins)?);
    let addr = cfg.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!(%addr, "price-service listening");
    homeval_core::mark_ready();

    axum::serve(listener, app)
        .with_graceful_shutdown(homeval_core::shutdown_signal())
        .await
        .context("http server")?;

    homeval_core::clear_ready();
    loader.shutdown();
    info!("price-service stopped");
    Ok(())
}
