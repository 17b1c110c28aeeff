//! Public HTTP surface: health, schema, predict and the model snapshot,
//! merged with the shared ops routes.

use crate::error::PredictError;
use crate::features::{FeatureVector, FeaturesPayload, FEATURE_NAMES};
use crate::inference::PredictionService;
use crate::loader::LoaderSnapshot;
use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::any::Any;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{self, AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tracing::{debug, error, warn};

#[derive(Clone)]
pub struct AppState {
    pub predictor: PredictionService,
}

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(alias = "data")]
    pub features: FeaturesPayload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub predicted_price: f64,
}

pub fn router(state: AppState, cors: CorsLayer) -> Router {
    let routes = Router::new()
        .route("/health", get(health))
        .route("/schema", get(schema))
        .route("/predict", post(predict))
        .route("/model", get(model))
        .merge(homeval_core::ops_router());
    with_layers(routes, cors).with_state(state)
}

/// Panics become a 500 error body inside the CORS layer, so browsers can
/// still read them.
fn with_layers<S: Clone + Send + Sync + 'static>(routes: Router<S>, cors: CorsLayer) -> Router<S> {
    routes.layer(CatchPanicLayer::custom(panic_response)).layer(cors)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = detail, "request handler panicked");
    error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal", "unexpected fault while handling the request".into())
}

async fn health() -> Json<serde_json::Value> { Json(json!({"ok": true})) }

async fn schema() -> Json<serde_json::Value> { Json(json!({"features": FEATURE_NAMES})) }

async fn model(State(st): State<AppState>) -> Json<LoaderSnapshot> { Json(st.predictor.loader().snapshot()) }

async fn predict(State(st): State<AppState>, body: Result<Json<PredictRequest>, JsonRejection>) -> Response {
    let Json(req) = match body {
        Ok(b) => b,
        Err(rej) => {
            debug!(error=%rej, "rejected predict body");
            return error_body(StatusCode::UNPROCESSABLE_ENTITY, "invalid_request", rej.body_text());
        }
    };
    let features = match FeatureVector::try_from(req.features) {
        Ok(v) => v,
        Err(e) => return PredictError::from(e).into_response(),
    };
    match st.predictor.predict(features).await {
        Ok(p) => Json(PredictResponse { predicted_price: p.value() }).into_response(),
        Err(e) => e.into_response(),
    }
}

fn error_body(status: StatusCode, kind: &str, message: String) -> Response {
    (status, Json(json!({"success": false, "error": kind, "message": message}))).into_response()
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = match &self {
            PredictError::ModelUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            PredictError::InferenceFailed { .. } => StatusCode::BAD_REQUEST,
            PredictError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() { warn!(kind = self.kind(), error=%self, "predict failed"); }
        error_body(status, self.kind(), self.to_string())
    }
}

/// A `*` entry allows any origin but then drops credentials, which browsers
/// refuse to combine with a wildcard.
pub fn cors_layer(origins: &[String]) -> Result<CorsLayer> {
    if origins.iter().any(|o| o.trim() == "*") {
        return Ok(CorsLayer::new().allow_origin(cors::Any).allow_methods(cors::Any).allow_headers(cors::Any));
    }
    let list = origins
        .iter()
        .map(|o| HeaderValue::from_str(o.trim()).with_context(|| format!("invalid CORS origin {o:?}")))
        .collect::<Result<Vec<_>>>()?;
    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(list))
        .allow_credentials(true)
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_accepts_data_alias_and_positional() {
        let r: PredictRequest = serde_json::from_str(&format!("{{\"data\": {:?}}}", vec![0.0; 18])).unwrap();
        assert!(FeatureVector::try_from(r.features).is_ok());
    }

    #[test]
    fn request_with_missing_field_does_not_parse() {
        assert!(serde_json::from_str::<PredictRequest>(r#"{"features": {"bedrooms": 3}}"#).is_err());
    }

    #[test]
    fn error_statuses() {
        let r = PredictError::ModelUnavailable { reason: "x".into() }.into_response();
        assert_eq!(r.status(), StatusCode::SERVICE_UNAVAILABLE);
        let r = PredictError::InferenceFailed { reason: "x".into() }.into_response();
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
        let r = PredictError::Internal { reason: "x".into() }.into_response();
        assert_eq!(r.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn handler_panic_becomes_internal_error_body() {
        let routes: Router = Router::new().route("/boom", get(|| async {
            if true { panic!("handler bug"); }
            "unreachable"
        }));
        let app = with_layers(routes, cors_layer(&["http://localhost:5173".into()]).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let client = reqwest::Client::new();
        let resp = client.get(format!("http://{addr}/boom")).header("origin", "http://localhost:5173").send().await.unwrap();
        assert_eq!(resp.status().as_u16(), 500);
        assert_eq!(resp.headers().get("access-control-allow-origin").unwrap(), "http://localhost:5173");
        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "internal");

        // The server keeps serving after the panic.
        let again = client.get(format!("http://{addr}/boom")).send().await.unwrap();
        assert_eq!(again.status().as_u16(), 500);
    }

    #[test]
    fn cors_rejects_unparseable_origin() {
        assert!(cors_layer(&["http://ok.example".into()]).is_ok());
        assert!(cors_layer(&["*".into()]).is_ok());
        assert!(cors_layer(&["bad\norigin".into()]).is_err());
    }
}
