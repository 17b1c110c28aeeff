//! Core shared utilities for homeval services: tracing, layered config,
//! liveness/readiness flags and the Prometheus ops endpoints.

use anyhow::Result;
use axum::{http::{header, StatusCode}, response::{IntoResponse, Response}, routing::get, Json, Router};
use once_cell::sync::OnceCell;
use prometheus::{Encoder, TextEncoder};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub mod config;
pub use config::{load_config, TelemetryConfig, CONFIG_FILE_ENV, ENV_PREFIX};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }
pub fn is_ready() -> bool { NODE_READINESS.load(Ordering::SeqCst) }
pub fn is_live() -> bool { NODE_LIVENESS.load(Ordering::SeqCst) }

/// Installs the global subscriber once per process. `RUST_LOG` wins over the
/// configured level; JSON output is selected by config or `HOMEVAL_JSON_LOG`.
pub fn init_tracing(service: &str, telemetry: &TelemetryConfig) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(f) => f,
            Err(_) => EnvFilter::try_new(&telemetry.log_level)?,
        };
        let json = telemetry.json || env_flag("HOMEVAL_JSON_LOG");
        let json_layer = json.then(|| {
            fmt::layer()
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(false)
        });
        let text_layer = (!json).then(|| {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_line_number(true)
        });
        tracing_subscriber::registry().with(filter).with(json_layer).with(text_layer).try_init()?;
        Ok(())
    })?;
    info!(target: "homeval", %service, "tracing initialized");
    Ok(())
}

fn env_flag(name: &str) -> bool {
    std::env::var(name).map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false)
}

/// `/live`, `/ready` and `/metrics`, mergeable into any service router.
pub fn ops_router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": is_live()})) }))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
}

async fn ready_handler() -> Response {
    let ready = is_ready();
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({"ready": ready}))).into_response()
}

async fn metrics_handler() -> Response {
    let metric_families = prometheus::gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await { tracing::warn!(error=?e, "ctrl_c handler failed"); }
    };
    #[cfg(unix)]
    let term = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => { s.recv().await; }
            Err(e) => { tracing::warn!(error=?e, "SIGTERM handler failed"); std::future::pending::<()>().await; }
        }
    };
    #[cfg(not(unix))]
    let term = std::future::pending::<()>();
    tokio::select! { _ = ctrl_c => {}, _ = term => {} }
    info!(target: "homeval", "shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_flag_toggles() {
        mark_ready();
        assert!(is_ready());
        clear_ready();
        assert!(!is_ready());
    }

    #[test]
    fn tracing_init_is_idempotent() {
        let t = TelemetryConfig::default();
        init_tracing("core-test", &t).unwrap();
        init_tracing("core-test", &t).unwrap();
    }

    #[tokio::test]
    async fn metrics_handler_encodes_registry() {
        let c = prometheus::IntCounter::new("homeval_core_test_total", "test counter").unwrap();
        prometheus::register(Box::new(c.clone())).unwrap();
        c.inc();
        let resp = metrics_handler().await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
