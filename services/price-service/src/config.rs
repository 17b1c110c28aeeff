use crate::artifact::{ArtifactDescriptor, FetchSettings};
use anyhow::{Context, Result};
use homeval_core::TelemetryConfig;
use serde::Deserialize;
use std::time::Duration;

pub const SERVICE_NAME: &str = "price-service";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub fetch: FetchConfig,
    pub cors: CorsConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { bind: "0.0.0.0".into(), port: 8001 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// http(s) or file URL of the artifact. Unset means the local file must exist.
    pub remote_url: Option<String>,
    pub local_path: String,
    pub sha256: Option<String>,
    pub warm_on_start: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self { remote_url: None, local_path: "models/house_price_rf.hvrf".into(), sha256: None, warm_on_start: false }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self { Self { timeout_secs: 300, connect_timeout_secs: 10 } }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { allowed_origins: vec!["http://localhost:5173".into(), "http://127.0.0.1:5173".into()] }
    }
}

impl ServiceConfig {
    pub fn load() -> Result<Self> {
        homeval_core::load_config(SERVICE_NAME, &["cors.allowed_origins"])
    }

    pub fn descriptor(&self) -> Result<ArtifactDescriptor> {
        let d = ArtifactDescriptor::new(self.model.remote_url.as_deref(), &self.model.local_path)
            .context("model.remote_url")?;
        Ok(d.with_sha256(self.model.sha256.as_deref()))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.fetch.timeout_secs.max(1)),
            connect_timeout: Duration::from_secs(self.fetch.connect_timeout_secs.max(1)),
        }
    }

    pub fn bind_addr(&self) -> String { format!("{}:{}", self.server.bind, self.server.port) }
}
