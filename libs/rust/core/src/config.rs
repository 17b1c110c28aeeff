//! Layered configuration: serde defaults, optional file, then environment.
//!
//! Environment keys use the `HOMEVAL` prefix and `__` as the nesting
//! separator, so `HOMEVAL__SERVER__PORT=9000` sets `server.port`.

use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Deserialize};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "HOMEVAL";
pub const CONFIG_FILE_ENV: &str = "HOMEVAL_CONFIG_FILE";

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self { Self { log_level: "info".into(), json: false } }
}

/// Loads `T` for `service`. `list_keys` names dotted keys whose environment
/// values are comma separated lists (e.g. `cors.allowed_origins`).
pub fn load_config<T: DeserializeOwned>(service: &str, list_keys: &[&str]) -> Result<T> {
    let file = std::env::var(CONFIG_FILE_ENV).ok().map(PathBuf::from);
    build(service, file, list_keys)
}

fn build<T: DeserializeOwned>(service: &str, file: Option<PathBuf>, list_keys: &[&str]) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = &file {
        builder = builder.add_source(config::File::from(path.as_path()).required(false));
    }
    let mut env = config::Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true);
    if !list_keys.is_empty() {
        env = env.list_separator(",");
        for key in list_keys { env = env.with_list_parse_key(key); }
    }
    builder = builder.add_source(env);
    let cfg = builder.build().with_context(|| format!("building config for {service}"))?;
    let parsed = cfg.try_deserialize::<T>().with_context(|| format!("invalid config for {service}"))?;
    tracing::debug!(%service, file=?file, "config loaded");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[derive(Debug, Deserialize, Default)]
    #[serde(default)]
    struct Sample {
        name: String,
        port: u16,
        telemetry: TelemetryConfig,
    }

    #[test]
    fn defaults_apply_without_sources() {
        let s: Sample = build("sample", None, &[]).unwrap();
        assert_eq!(s.port, 0);
        assert_eq!(s.telemetry.log_level, "info");
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svc.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "name: from-file\nport: 8123\ntelemetry:\n  json: true").unwrap();
        let s: Sample = build("sample", Some(path), &[]).unwrap();
        assert_eq!(s.name, "from-file");
        assert_eq!(s.port, 8123);
        assert!(s.telemetry.json);
        assert_eq!(s.telemetry.log_level, "info");
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s: Sample = build("sample", Some(dir.path().join("absent.toml")), &[]).unwrap();
        assert_eq!(s.name, "");
    }
}
