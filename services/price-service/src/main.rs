use anyhow::Result;
use homeval_core::init_tracing;
use price_service::{config::SERVICE_NAME, ServiceConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = ServiceConfig::load()?;
    init_tracing(SERVICE_NAME, &cfg.telemetry)?;
    info!(?cfg, "config loaded");
    price_service::run(cfg).await
}
