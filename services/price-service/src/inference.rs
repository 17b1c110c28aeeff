use crate::error::PredictError;
use crate::features::FeatureVector;
use crate::loader::ArtifactLoader;
use crate::metrics;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionResult(pub f64);

impl PredictionResult {
    pub fn value(self) -> f64 { self.0 }
}

/// Turns an ordered feature vector into a prediction using the shared handle.
#[derive(Clone)]
pub struct PredictionService {
    loader: ArtifactLoader,
}

impl PredictionService {
    pub fn new(loader: ArtifactLoader) -> Self { Self { loader } }

    pub fn loader(&self) -> &ArtifactLoader { &self.loader }

    #[instrument(skip_all)]
    pub async fn predict(&self, features: FeatureVector) -> Result<PredictionResult, PredictError> {
        let start = Instant::now();
        let result = self.run(features).await;
        metrics::PREDICT_SECONDS.observe(start.elapsed().as_secs_f64());
        metrics::PREDICT_TOTAL.with_label_values(&[match &result { Ok(_) => "ok", Err(e) => e.kind() }]).inc();
        result
    }

    async fn run(&self, features: FeatureVector) -> Result<PredictionResult, PredictError> {
        let handle = self.loader.get_handle().await?;
        let generation = handle.generation();
        match tokio::task::spawn_blocking(move || handle.predict(features.as_slice())).await {
            Ok(Ok(y)) => {
                debug!(generation, prediction = y, "predicted");
                Ok(PredictionResult(y))
            }
            Ok(Err(e)) => Err(e.into()),
            Err(join) => {
                error!(generation, error=%join, "model evaluation panicked");
                Err(PredictError::Internal { reason: "model evaluation aborted".into() })
            }
        }
    }
}
