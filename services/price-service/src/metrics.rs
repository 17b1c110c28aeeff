//! Prometheus instruments for the artifact lifecycle and prediction path.
//! Registered in the default registry served by `homeval_core::ops_router`.

use once_cell::sync::Lazy;
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts};

fn register<C: prometheus::core::Collector + Clone + 'static>(c: C) -> C {
    if let Err(e) = prometheus::register(Box::new(c.clone())) {
        tracing::debug!(error=%e, "metric already registered");
    }
    c
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    register(IntCounterVec::new(Opts::new(name, help), labels).expect("static metric descriptor"))
}

fn histogram(name: &str, help: &str, buckets: Vec<f64>) -> Histogram {
    register(Histogram::with_opts(HistogramOpts::new(name, help).buckets(buckets)).expect("static metric descriptor"))
}

pub static FETCH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("homeval_artifact_fetch_total", "Artifact ensure_present calls by outcome", &["outcome"])
});

pub static FETCH_BYTES: Lazy<IntCounter> = Lazy::new(|| {
    register(IntCounter::new("homeval_artifact_fetch_bytes_total", "Artifact bytes written to the local cache").expect("static metric descriptor"))
});

pub static FETCH_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    histogram("homeval_artifact_fetch_seconds", "Wall time of artifact downloads", prometheus::exponential_buckets(0.05, 2.0, 14).unwrap_or_default())
});

pub static LOAD_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("homeval_model_load_total", "Model load attempts by outcome", &["outcome"])
});

pub static LOAD_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    histogram("homeval_model_load_seconds", "Fetch plus decode time per load attempt", prometheus::exponential_buckets(0.01, 2.0, 16).unwrap_or_default())
});

pub static MODEL_LOADED: Lazy<IntGauge> = Lazy::new(|| {
    register(IntGauge::new("homeval_model_loaded", "1 while a model handle is installed").expect("static metric descriptor"))
});

pub static PREDICT_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    counter_vec("homeval_predict_total", "Predictions by outcome", &["outcome"])
});

pub static PREDICT_SECONDS: Lazy<Histogram> = Lazy::new(|| {
    histogram("homeval_predict_seconds", "Prediction latency including handle acquisition", prometheus::exponential_buckets(0.0001, 2.0, 18).unwrap_or_default())
});
