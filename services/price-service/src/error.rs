//! Error taxonomy, from the fetch layer up to the caller-facing predict errors.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("invalid artifact url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("unsupported artifact url scheme {0:?} (expected http, https or file)")]
    UnsupportedScheme(String),
}

/// Failure to materialise the artifact locally. Terminal for the call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FetchError {
    #[error("artifact source unreachable: {0}")]
    SourceUnreachable(String),
    #[error("artifact source rejected the request with status {status}")]
    SourceRejected { status: u16 },
    #[error("artifact fetch exceeded {0:?}")]
    Timeout(Duration),
    #[error("writing artifact locally failed: {0}")]
    LocalWriteFailed(String),
    #[error("no remote artifact location configured and {} is missing", path.display())]
    NotConfigured { path: PathBuf },
    #[error("artifact source returned an empty body")]
    EmptyPayload,
    #[error("artifact stream ended after {received} of {expected} bytes")]
    Truncated { expected: u64, received: u64 },
    #[error("artifact sha256 mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("artifact is corrupt: {0}")]
    Corrupt(String),
    #[error("out of memory while loading artifact: {0}")]
    OutOfMemory(String),
    #[error("artifact could not be read: {0}")]
    Io(String),
    #[error("load aborted: {0}")]
    Aborted(String),
}

impl LoadError {
    pub(crate) fn from_io(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::OutOfMemory => LoadError::OutOfMemory(e.to_string()),
            _ => LoadError::Io(e.to_string()),
        }
    }
}

/// Raised by a loaded model for a single input.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("expected {expected} features, got {actual}")]
    Shape { expected: usize, actual: usize },
    #[error("feature {index} is not finite")]
    NonFiniteInput { index: usize },
    #[error("model produced a non-finite prediction")]
    NonFiniteOutput,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("expected {expected} features, got {actual}")]
    Length { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictError {
    /// The model could not be obtained; retrying later may succeed.
    #[error("model unavailable: {reason}")]
    ModelUnavailable { reason: String },
    #[error("inference failed: {reason}")]
    InferenceFailed { reason: String },
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::ModelUnavailable { .. } => "model_unavailable",
            PredictError::InferenceFailed { .. } => "inference_failed",
            PredictError::Internal { .. } => "internal",
        }
    }
}

impl From<LoadError> for PredictError {
    fn from(e: LoadError) -> Self { PredictError::ModelUnavailable { reason: e.to_string() } }
}

impl From<ModelError> for PredictError {
    fn from(e: ModelError) -> Self { PredictError::InferenceFailed { reason: e.to_string() } }
}

impl From<FeatureError> for PredictError {
    fn from(e: FeatureError) -> Self { PredictError::InferenceFailed { reason: e.to_string() } }
}
