//! The bounded worker pool (spec §5/§9): CPU-bound ASR and embedding calls are
//! dispatched to `tokio::task::spawn_blocking`, admission-gated by a
//! `Semaphore` sized to the number of physical cores, so a session's own I/O
//! loop never blocks on inference. `HandlePool` (and the `Pooled*` wrappers
//! built on it) addresses the companion rule in spec §9 — "do not protect a
//! single handle with a mutex across many workers" — by handing each admitted
//! caller one of a fixed set of independent native handles instead of one
//! handle shared behind a single mutex.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Semaphore, SemaphorePermit};

use voxkey_core::traits::{Asr, AsrResult, EmbeddingExtractor, Vad, VadResult};
use voxkey_core::{AudioFrame, CoreError, Embedding, Result};

/// `0` means "number of physical cores", the same convention
/// `PipelineConfig::worker_pool_size` uses.
pub fn effective_pool_size(configured: usize) -> usize {
    if configured == 0 {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    } else {
        configured
    }
}

#[derive(Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(effective_pool_size(size))),
        }
    }

    /// Run `job` under admission control, waiting for a free slot rather than
    /// spawning unbounded work. `job` must be `Send + 'static` since it may
    /// run on a blocking-pool thread.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| CoreError::Internal(format!("worker pool closed: {e}")))?;

        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await
        .map_err(|e| CoreError::Internal(format!("worker task panicked: {e}")))?;

        result
    }

    /// Run an async `job` under the same admission control, for stages that
    /// are themselves `async fn` (e.g. trait-object calls into `Asr`/
    /// `EmbeddingExtractor` implementations) rather than blocking closures.
    pub async fn run_async<F, Fut, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| CoreError::Internal(format!("worker pool closed: {e}")))?;

        job().await
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

/// A fixed-size round-robin pool of independent native handles, admission-
/// gated to exactly `handles.len()` concurrent checkouts. With `N` handles
/// and `N` permits, any `N` concurrently-admitted checkouts draw `N`
/// sequential cursor values, which are a complete residue system mod `N` —
/// so no two callers holding a permit at the same time ever share a handle.
pub struct HandlePool<T: ?Sized> {
    handles: Vec<Arc<T>>,
    semaphore: Semaphore,
    cursor: AtomicUsize,
}

impl<T: ?Sized> HandlePool<T> {
    pub fn new(handles: Vec<Arc<T>>) -> Self {
        assert!(!handles.is_empty(), "a handle pool needs at least one handle");
        let size = handles.len();
        Self {
            handles,
            semaphore: Semaphore::new(size),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.handles.len()
    }

    async fn checkout(&self) -> PooledHandle<'_, T> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .expect("handle pool semaphore is never closed");
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % self.handles.len();
        PooledHandle {
            handle: self.handles[index].clone(),
            _permit: permit,
        }
    }
}

struct PooledHandle<'a, T: ?Sized> {
    handle: Arc<T>,
    _permit: SemaphorePermit<'a>,
}

impl<T: ?Sized> std::ops::Deref for PooledHandle<'_, T> {
    type Target = Arc<T>;
    fn deref(&self) -> &Arc<T> {
        &self.handle
    }
}

/// Spreads `transcribe` calls across `N` independent `Asr` handles (e.g. one
/// `OnnxCtcAsr` session per worker) instead of serializing every caller on a
/// single mutex-guarded session.
pub struct PooledAsr(HandlePool<dyn Asr>);

impl PooledAsr {
    pub fn new(handles: Vec<Arc<dyn Asr>>) -> Self {
        Self(HandlePool::new(handles))
    }
}

#[async_trait]
impl Asr for PooledAsr {
    async fn transcribe(&self, audio: &AudioFrame) -> Result<AsrResult> {
        let handle = self.0.checkout().await;
        handle.transcribe(audio).await
    }

    fn name(&self) -> &str {
        "pooled-asr"
    }
}

/// Spreads `detect` calls across `N` independent `Vad` handles.
pub struct PooledVad(HandlePool<dyn Vad>);

impl PooledVad {
    pub fn new(handles: Vec<Arc<dyn Vad>>) -> Self {
        Self(HandlePool::new(handles))
    }
}

#[async_trait]
impl Vad for PooledVad {
    async fn detect(&self, audio: &AudioFrame) -> VadResult {
        let handle = self.0.checkout().await;
        handle.detect(audio).await
    }

    fn name(&self) -> &str {
        "pooled-vad"
    }
}

/// Spreads `extract` calls across `N` independent `EmbeddingExtractor`
/// handles. `dimension()` is cached at construction since picking a handle
/// requires an async checkout and every handle must agree on it anyway.
pub struct PooledEmbeddingExtractor {
    pool: HandlePool<dyn EmbeddingExtractor>,
    dim: usize,
}

impl PooledEmbeddingExtractor {
    pub fn new(handles: Vec<Arc<dyn EmbeddingExtractor>>) -> Self {
        let dim = handles[0].dimension();
        Self {
            pool: HandlePool::new(handles),
            dim,
        }
    }
}

#[async_trait]
impl EmbeddingExtractor for PooledEmbeddingExtractor {
    async fn extract(&self, audio: &AudioFrame) -> Result<Embedding> {
        let handle = self.pool.checkout().await;
        handle.extract(audio).await
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn name(&self) -> &str {
        "pooled-embedding-extractor"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_executes_closure_and_releases_permit() {
        let pool = WorkerPool::new(2);
        let result = pool.run(|| Ok(40 + 2)).await.unwrap();
        assert_eq!(result, 42);
        assert_eq!(pool.available_permits(), 2);
    }

    #[tokio::test]
    async fn run_propagates_job_errors() {
        let pool = WorkerPool::new(1);
        let err = pool
            .run(|| Err::<(), _>(CoreError::Internal("boom".into())))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn run_async_serializes_beyond_pool_size() {
        let pool = WorkerPool::new(1);
        assert_eq!(pool.available_permits(), 1);
        let fut = pool.run_async(|| async { Ok::<_, CoreError>(7) });
        assert_eq!(fut.await.unwrap(), 7);
        assert_eq!(pool.available_permits(), 1);
    }

    #[tokio::test]
    async fn pooled_asr_round_robins_across_its_handles() {
        use voxkey_core::traits::fakes::PlantedAsr;

        let handles: Vec<Arc<dyn Asr>> = vec![
            Arc::new(PlantedAsr::new("1111")),
            Arc::new(PlantedAsr::new("2222")),
        ];
        let pooled = PooledAsr::new(handles);
        let frame = AudioFrame::new(vec![0.0; 16], voxkey_core::SampleRate::Hz16000, voxkey_core::Channels::Mono, 0);

        let first = pooled.transcribe(&frame).await.unwrap().text;
        let second = pooled.transcribe(&frame).await.unwrap().text;
        assert_ne!(first, second, "consecutive checkouts should round-robin across handles");
    }

    #[tokio::test]
    async fn pooled_extractor_reports_shared_dimension() {
        use voxkey_core::traits::fakes::DeterministicExtractor;

        let handles: Vec<Arc<dyn EmbeddingExtractor>> =
            vec![Arc::new(DeterministicExtractor::new(192)), Arc::new(DeterministicExtractor::new(192))];
        let pooled = PooledEmbeddingExtractor::new(handles);
        assert_eq!(pooled.dimension(), 192);
    }
}
