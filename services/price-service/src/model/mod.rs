//! Loaded model handles and the decoder seam used by the loader.

use crate::error::{LoadError, ModelError};
use serde::Serialize;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

pub mod forest;
pub use forest::{ForestDecoder, ForestModel, ForestWriter, TreeNode};

/// Vector of floats in, float out. Implementations are immutable once built.
pub trait Regressor: Send + Sync + 'static {
    fn n_features(&self) -> usize;
    fn predict(&self, features: &[f64]) -> Result<f64, ModelError>;
}

/// Turns the artifact at `path` into a model. Runs on the blocking pool.
pub trait ArtifactDecoder: Send + Sync + 'static {
    fn decode(&self, path: &Path) -> Result<Box<dyn Regressor>, LoadError>;
}

/// A loaded model shared read-only by every request until released.
pub struct ModelHandle {
    model: Box<dyn Regressor>,
    generation: u64,
    artifact_bytes: u64,
    loaded_at: SystemTime,
}

impl ModelHandle {
    pub fn new(model: Box<dyn Regressor>, generation: u64, artifact_bytes: u64) -> Self {
        Self { model, generation, artifact_bytes, loaded_at: SystemTime::now() }
    }

    pub fn predict(&self, features: &[f64]) -> Result<f64, ModelError> { self.model.predict(features) }
    pub fn n_features(&self) -> usize { self.model.n_features() }
    pub fn generation(&self) -> u64 { self.generation }
    pub fn artifact_bytes(&self) -> u64 { self.artifact_bytes }
    pub fn loaded_at(&self) -> SystemTime { self.loaded_at }

    pub fn info(&self) -> HandleInfo {
        HandleInfo {
            generation: self.generation,
            artifact_bytes: self.artifact_bytes,
            n_features: self.n_features(),
            loaded_at_ms: self.loaded_at.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle")
            .field("generation", &self.generation)
            .field("artifact_bytes", &self.artifact_bytes)
            .field("n_features", &self.n_features())
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HandleInfo {
    pub generation: u64,
    pub artifact_bytes: u64,
    pub n_features: usize,
    pub loaded_at_ms: u64,
}
