//! Single-flight, lazily loaded, releasable model handle.
//!
//! State machine: `Unloaded -> Loading -> Loaded -> (release) -> Unloaded`.
//! The first caller to see `Unloaded` claims `Loading` under the state lock
//! and spawns the load; everyone else waits on the same attempt's outcome.
//! A failed attempt returns the state to `Unloaded` so the next call retries.

use crate::artifact::{ArtifactDescriptor, ArtifactSource};
use crate::error::LoadError;
use crate::metrics;
use crate::model::{ArtifactDecoder, HandleInfo, ModelHandle};
use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{error, info, warn};

type LoadOutcome = Result<Arc<ModelHandle>, LoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderStatus { Unloaded, Loading, Loaded }

#[derive(Debug, Clone, Serialize)]
pub struct LoaderSnapshot {
    pub state: LoaderStatus,
    pub local_path: String,
    pub remote: Option<String>,
    pub handle: Option<HandleInfo>,
}

enum Phase {
    Unloaded,
    Loading { attempt: u64, outcome: watch::Receiver<Option<LoadOutcome>> },
    Loaded(Arc<ModelHandle>),
}

struct LoaderState {
    phase: Phase,
    attempts: u64,
}

struct Inner {
    descriptor: ArtifactDescriptor,
    source: Arc<dyn ArtifactSource>,
    decoder: Arc<dyn ArtifactDecoder>,
    state: Mutex<LoaderState>,
    // Mirrors `Phase::Loaded` so the hot path skips the lock.
    current: ArcSwapOption<ModelHandle>,
}

#[derive(Clone)]
pub struct ArtifactLoader {
    inner: Arc<Inner>,
}

impl ArtifactLoader {
    pub fn new(descriptor: ArtifactDescriptor, source: Arc<dyn ArtifactSource>, decoder: Arc<dyn ArtifactDecoder>) -> Self {
        Self {
            inner: Arc::new(Inner {
                descriptor,
                source,
                decoder,
                state: Mutex::new(LoaderState { phase: Phase::Unloaded, attempts: 0 }),
                current: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn descriptor(&self) -> &ArtifactDescriptor { &self.inner.descriptor }

    pub fn status(&self) -> LoaderStatus {
        match self.inner.state.lock().phase {
            Phase::Unloaded => LoaderStatus::Unloaded,
            Phase::Loading { .. } => LoaderStatus::Loading,
            Phase::Loaded(_) => LoaderStatus::Loaded,
        }
    }

    pub fn snapshot(&self) -> LoaderSnapshot {
        let d = &self.inner.descriptor;
        LoaderSnapshot {
            state: self.status(),
            local_path: d.local_path().display().to_string(),
            remote: d.remote().map(|u| u.to_string()),
            handle: self.inner.current.load_full().map(|h| h.info()),
        }
    }

    /// Never blocks. With `warm` set, one background load is started so the
    /// first request does not pay for it. Must be called inside a runtime.
    pub fn initialize(&self, warm: bool) {
        let d = &self.inner.descriptor;
        info!(path=%d.local_path().display(), remote=?d.remote().map(|u| u.as_str()), warm, "artifact loader initialized");
        if !warm { return; }
        let loader = self.clone();
        tokio::spawn(async move {
            match loader.get_handle().await {
                Ok(h) => info!(generation = h.generation(), "model warmed"),
                Err(e) => warn!(error=%e, "warm load failed; will retry on first request"),
            }
        });
    }

    /// Returns the shared handle, loading it first if needed. Dropping the
    /// returned future does not cancel an in-flight load.
    pub async fn get_handle(&self) -> Result<Arc<ModelHandle>, LoadError> {
        if let Some(h) = self.inner.current.load_full() { return Ok(h); }

        let mut reclaimed = false;
        loop {
            let (attempt, mut rx) = {
                let mut guard = self.inner.state.lock();
                let st = &mut *guard;
                match &st.phase {
                    Phase::Loaded(h) => return Ok(h.clone()),
                    Phase::Loading { attempt, outcome } => (*attempt, outcome.clone()),
                    Phase::Unloaded => {
                        st.attempts += 1;
                        let attempt = st.attempts;
                        let (tx, rx) = watch::channel(None);
                        st.phase = Phase::Loading { attempt, outcome: rx.clone() };
                        tokio::spawn(Inner::run_load(self.inner.clone(), attempt, tx));
                        (attempt, rx)
                    }
                }
            };

            let outcome = match rx.wait_for(Option::is_some).await {
                Ok(v) => (*v).clone(),
                Err(_) => None,
            };
            if let Some(r) = outcome { return r; }

            // Load task went away without reporting: clear the stale attempt
            // and claim a fresh one, once.
            {
                let mut st = self.inner.state.lock();
                if matches!(st.phase, Phase::Loading { attempt: a, .. } if a == attempt) {
                    st.phase = Phase::Unloaded;
                }
            }
            if reclaimed {
                return Err(LoadError::Aborted(format!("load attempt {attempt} ended without a result")));
            }
            warn!(attempt, "load attempt ended without a result; retrying");
            reclaimed = true;
        }
    }

    /// Drops the installed handle and returns to `Unloaded`. Returns whether a
    /// handle was installed. Requests still holding the old `Arc` finish with
    /// it; the mapping is released when the last one drops.
    pub fn release_handle(&self) -> bool {
        let prev = {
            let mut st = self.inner.state.lock();
            self.inner.current.store(None);
            std::mem::replace(&mut st.phase, Phase::Unloaded)
        };
        match prev {
            Phase::Loaded(h) => {
                metrics::MODEL_LOADED.set(0);
                info!(generation = h.generation(), outstanding = Arc::strong_count(&h) - 1, "model handle released");
                true
            }
            Phase::Loading { attempt, .. } => {
                info!(attempt, "released while loading; in-flight result will not be installed");
                false
            }
            Phase::Unloaded => false,
        }
    }

    pub fn shutdown(&self) {
        if self.release_handle() { info!("artifact loader shut down"); }
    }
}

impl Inner {
    async fn run_load(inner: Arc<Inner>, attempt: u64, tx: watch::Sender<Option<LoadOutcome>>) {
        let start = Instant::now();
        // A panic inside the load still has to settle this attempt.
        let task = {
            let inner = inner.clone();
            tokio::spawn(async move { inner.load(attempt).await })
        };
        let outcome = match task.await {
            Ok(r) => r,
            Err(e) => Err(LoadError::Aborted(format!("load attempt {attempt} failed: {e}"))),
        };
        metrics::LOAD_SECONDS.observe(start.elapsed().as_secs_f64());
        {
            let mut st = inner.state.lock();
            let current = matches!(st.phase, Phase::Loading { attempt: a, .. } if a == attempt);
            match &outcome {
                Ok(h) if current => {
                    st.phase = Phase::Loaded(h.clone());
                    inner.current.store(Some(h.clone()));
                    metrics::MODEL_LOADED.set(1);
                }
                Err(_) if current => st.phase = Phase::Unloaded,
                _ => {}
            }
        }
        match &outcome {
            Ok(h) => {
                metrics::LOAD_TOTAL.with_label_values(&["ok"]).inc();
                info!(attempt, generation = h.generation(), bytes = h.artifact_bytes(), elapsed_ms = start.elapsed().as_millis() as u64, "model loaded");
            }
            Err(e) => {
                metrics::LOAD_TOTAL.with_label_values(&[load_outcome_label(e)]).inc();
                error!(attempt, error=%e, "model load failed");
            }
        }
        tx.send_replace(Some(outcome));
    }

    async fn load(&self, attempt: u64) -> LoadOutcome {
        self.source.ensure_present(&self.descriptor).await?;
        let decoder = self.decoder.clone();
        let path = self.descriptor.local_path().to_path_buf();
        let (model, bytes) = tokio::task::spawn_blocking(move || {
            let bytes = std::fs::metadata(&path).map(|m| m.len()).map_err(LoadError::from_io)?;
            decoder.decode(&path).map(|m| (m, bytes))
        })
        .await
        .map_err(|e| LoadError::Aborted(format!("decode task failed: {e}")))??;
        Ok(Arc::new(ModelHandle::new(model, attempt, bytes)))
    }
}

fn load_outcome_label(e: &LoadError) -> &'static str {
    match e {
        LoadError::Fetch(_) => "fetch_failed",
        LoadError::Corrupt(_) => "corrupt",
        LoadError::OutOfMemory(_) => "oom",
        LoadError::Io(_) => "io",
        LoadError::Aborted(_) => "aborted",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::model::{ForestDecoder, ForestWriter, TreeNode};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowLocal { calls: AtomicUsize, delay: Duration }

    #[async_trait]
    impl ArtifactSource for SlowLocal {
        async fn ensure_present(&self, d: &ArtifactDescriptor) -> Result<(), FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if d.local_path().exists() { Ok(()) } else { Err(FetchError::NotConfigured { path: d.local_path().to_path_buf() }) }
        }
    }

    fn fixture(delay_ms: u64) -> (tempfile::TempDir, ArtifactLoader, Arc<SlowLocal>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.hvrf");
        ForestWriter::new(1).tree(vec![TreeNode::Leaf(7.0)]).write_to(&path).unwrap();
        let src = Arc::new(SlowLocal { calls: AtomicUsize::new(0), delay: Duration::from_millis(delay_ms) });
        let loader = ArtifactLoader::new(ArtifactDescriptor::local_only(&path), src.clone(), Arc::new(ForestDecoder::new(1)));
        (dir, loader, src)
    }

    #[tokio::test]
    async fn lazy_until_first_call() {
        let (_d, loader, src) = fixture(0);
        loader.initialize(false);
        assert_eq!(loader.status(), LoaderStatus::Unloaded);
        assert_eq!(src.calls.load(Ordering::SeqCst), 0);
        let h = loader.get_handle().await.unwrap();
        assert_eq!(h.predict(&[0.0]).unwrap(), 7.0);
        assert_eq!(loader.status(), LoaderStatus::Loaded);
    }

    #[tokio::test]
    async fn release_while_loading_discards_result() {
        let (_d, loader, src) = fixture(100);
        let l2 = loader.clone();
        let waiter = tokio::spawn(async move { l2.get_handle().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(loader.status(), LoaderStatus::Loading);
        assert!(!loader.release_handle());
        assert!(waiter.await.unwrap().is_ok());
        assert_eq!(loader.status(), LoaderStatus::Unloaded);
        loader.get_handle().await.unwrap();
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    /// Panics on its first call, then behaves like a present local file.
    struct PanicOnce { calls: AtomicUsize }

    #[async_trait]
    impl ArtifactSource for PanicOnce {
        async fn ensure_present(&self, _: &ArtifactDescriptor) -> Result<(), FetchError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            if n == 0 { panic!("source blew up"); }
            Ok(())
        }
    }

    fn panicking_fixture() -> (tempfile::TempDir, ArtifactLoader, Arc<PanicOnce>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.hvrf");
        ForestWriter::new(1).tree(vec![TreeNode::Leaf(7.0)]).write_to(&path).unwrap();
        let src = Arc::new(PanicOnce { calls: AtomicUsize::new(0) });
        let loader = ArtifactLoader::new(ArtifactDescriptor::local_only(&path), src.clone(), Arc::new(ForestDecoder::new(1)));
        (dir, loader, src)
    }

    #[tokio::test]
    async fn panicked_load_without_waiters_returns_to_unloaded() {
        let (_d, loader, src) = panicking_fixture();
        assert!(tokio::time::timeout(Duration::from_millis(5), loader.get_handle()).await.is_err());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(loader.status(), LoaderStatus::Unloaded);

        let h = loader.get_handle().await.unwrap();
        assert_eq!(h.generation(), 2);
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn panicked_load_is_reported_to_its_waiters_then_retried() {
        let (_d, loader, src) = panicking_fixture();
        let err = loader.get_handle().await.unwrap_err();
        assert!(matches!(err, LoadError::Aborted(_)), "{err:?}");
        assert_eq!(loader.status(), LoaderStatus::Unloaded);

        loader.get_handle().await.unwrap();
        assert_eq!(src.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn snapshot_reports_handle() {
        let (_d, loader, _src) = fixture(0);
        assert!(loader.snapshot().handle.is_none());
        loader.get_handle().await.unwrap();
        let snap = loader.snapshot();
        assert_eq!(snap.state, LoaderStatus::Loaded);
        assert_eq!(snap.handle.unwrap().generation, 1);
    }
}
