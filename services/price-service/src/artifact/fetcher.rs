use super::staging::StagingFile;
use super::ArtifactDescriptor;
use crate::error::FetchError;
use crate::metrics;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Url;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tracing::{debug, info, instrument, warn};

/// Read size for `file://` sources; http bodies arrive in transport-sized chunks.
pub const FILE_CHUNK_BYTES: usize = 1 << 20;

/// Guarantees a complete local copy of the artifact.
#[async_trait]
pub trait ArtifactSource: Send + Sync + 'static {
    async fn ensure_present(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError>;
}

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

impl Default for FetchSettings {
    fn default() -> Self { Self { timeout: Duration::from_secs(300), connect_timeout: Duration::from_secs(10) } }
}

#[derive(Clone)]
pub struct ArtifactFetcher {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ArtifactFetcher {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .user_agent(concat!("homeval-price-service/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| FetchError::SourceUnreachable(format!("http client init: {e}")))?;
        Ok(Self { client, settings })
    }

    async fn stream_http(&self, url: &Url, staging: &mut StagingFile) -> Result<(), FetchError> {
        let resp = self.client.get(url.clone()).send().await.map_err(|e| self.classify(e))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::SourceRejected { status: status.as_u16() });
        }
        let expected = resp.content_length();
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.classify(e))?;
            staging.write_chunk(&chunk).await?;
        }
        if let Some(expected) = expected {
            if staging.written() != expected {
                return Err(FetchError::Truncated { expected, received: staging.written() });
            }
        }
        Ok(())
    }

    async fn stream_file(&self, url: &Url, staging: &mut StagingFile) -> Result<(), FetchError> {
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::SourceUnreachable(format!("{url} is not a local file path")))?;
        let mut src = tokio::fs::File::open(&path)
            .await
            .map_err(|e| FetchError::SourceUnreachable(format!("{}: {e}", path.display())))?;
        let mut buf = vec![0u8; FILE_CHUNK_BYTES];
        loop {
            let n = src.read(&mut buf).await.map_err(|e| FetchError::SourceUnreachable(e.to_string()))?;
            if n == 0 { break; }
            staging.write_chunk(&buf[..n]).await?;
        }
        Ok(())
    }

    fn classify(&self, e: reqwest::Error) -> FetchError {
        if e.is_connect() && e.is_timeout() {
            FetchError::SourceUnreachable(format!("connect timed out after {:?}", self.settings.connect_timeout))
        } else if e.is_timeout() {
            FetchError::Timeout(self.settings.timeout)
        } else {
            FetchError::SourceUnreachable(e.to_string())
        }
    }
}

async fn is_present(path: &Path) -> bool {
    matches!(tokio::fs::metadata(path).await, Ok(m) if m.is_file() && m.len() > 0)
}

fn outcome_label(r: &Result<(), FetchError>) -> &'static str {
    match r {
        Ok(()) => "ok",
        Err(FetchError::SourceUnreachable(_)) => "unreachable",
        Err(FetchError::SourceRejected { .. }) => "rejected",
        Err(FetchError::Timeout(_)) => "timeout",
        Err(FetchError::LocalWriteFailed(_)) => "write_failed",
        Err(FetchError::NotConfigured { .. }) => "not_configured",
        Err(FetchError::EmptyPayload) | Err(FetchError::Truncated { .. }) => "truncated",
        Err(FetchError::IntegrityMismatch { .. }) => "integrity",
    }
}

#[async_trait]
impl ArtifactSource for ArtifactFetcher {
    #[instrument(skip(self, descriptor), fields(path = %descriptor.local_path().display()))]
    async fn ensure_present(&self, descriptor: &ArtifactDescriptor) -> Result<(), FetchError> {
        let target = descriptor.local_path();
        if is_present(target).await {
            debug!("artifact already cached");
            metrics::FETCH_TOTAL.with_label_values(&["cached"]).inc();
            return Ok(());
        }
        let Some(url) = descriptor.remote() else {
            metrics::FETCH_TOTAL.with_label_values(&["not_configured"]).inc();
            return Err(FetchError::NotConfigured { path: target.to_path_buf() });
        };
        info!(%url, "fetching artifact");
        let start = Instant::now();
        let result = async {
            let mut staging = StagingFile::create(target).await?;
            let streamed = async {
                if url.scheme() == "file" { self.stream_file(url, &mut staging).await } else { self.stream_http(url, &mut staging).await }
            };
            match tokio::time::timeout(self.settings.timeout, streamed).await {
                Ok(r) => r?,
                Err(_) => return Err(FetchError::Timeout(self.settings.timeout)),
            }
            let bytes = staging.persist(descriptor.sha256()).await?;
            metrics::FETCH_BYTES.inc_by(bytes);
            info!(bytes, elapsed_ms = start.elapsed().as_millis() as u64, "artifact fetched");
            Ok::<(), FetchError>(())
        }
        .await;
        metrics::FETCH_SECONDS.observe(start.elapsed().as_secs_f64());
        metrics::FETCH_TOTAL.with_label_values(&[outcome_label(&result)]).inc();
        if let Err(e) = &result { warn!(error = %e, "artifact fetch failed"); }
        result
    }
}
