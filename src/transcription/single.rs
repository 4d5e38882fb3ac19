//! One-shot transcription: the request waits for the engine.

use crate::cache::{CacheLease, CacheStore};
use crate::config::DecodeParams;
use crate::error::AppResult;
use crate::transcription::engine::{with_deadline, InferenceEngine};
use crate::transcription::result::Transcription;
use crate::transcription::upload::Upload;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct SingleRequestHandler {
    cache: Arc<CacheStore>,
    engine: Arc<dyn InferenceEngine>,
    params: DecodeParams,
    engine_timeout: Duration,
}

impl SingleRequestHandler {
    pub fn new(
        cache: Arc<CacheStore>,
        engine: Arc<dyn InferenceEngine>,
        params: DecodeParams,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            engine,
            params,
            engine_timeout,
        }
    }

    /// Store `upload`, decode it and remove it again.
    ///
    /// The cached file is released whether or not the engine succeeds. If the
    /// request itself is dropped mid-call, the lease's `Drop` removes it.
    pub async fn transcribe(&self, upload: &Upload) -> AppResult<Transcription> {
        let start_time = Instant::now();
        let entry = self.cache.store(&upload.content, &upload.filename).await?;
        let lease = CacheLease::new(entry);

        let outcome = with_deadline(
            self.engine_timeout,
            self.engine.transcribe_file(lease.path(), &self.params),
        )
        .await;
        lease.release(&self.cache).await;

        match &outcome {
            Ok(_) => tracing::info!(
                filename = %upload.filename,
                duration_ms = start_time.elapsed().as_millis() as u64,
                "Single file transcribed"
            ),
            Err(e) => tracing::warn!(filename = %upload.filename, "Single file failed: {}", e),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::transcription::testing::{Behaviour, ScriptedEngine};
    use tempfile::TempDir;

    async fn handler(
        engine: Arc<ScriptedEngine>,
        timeout: Duration,
    ) -> (TempDir, Arc<CacheStore>, SingleRequestHandler) {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        cache.ensure().await.unwrap();
        let handler =
            SingleRequestHandler::new(cache.clone(), engine, DecodeParams::default(), timeout);
        (dir, cache, handler)
    }

    #[tokio::test]
    async fn test_transcribe_returns_engine_output_and_releases_file() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Annotate));
        let (_dir, cache, handler) = handler(engine.clone(), Duration::from_secs(5)).await;

        let result = handler
            .transcribe(&Upload::new("meeting.m4a", b"audio".to_vec()))
            .await
            .unwrap();

        let seen = engine.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].extension().unwrap(), "m4a");
        assert!(!seen[0].exists());
        match result {
            Transcription::Text(text) => assert!(text.ends_with(".m4a")),
            other => panic!("expected text, got {:?}", other),
        }
        assert_eq!(cache.status().await.unwrap().audio_files_count, 0);
    }

    #[tokio::test]
    async fn test_engine_failure_surfaces_and_releases_file() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Fail));
        let (_dir, cache, handler) = handler(engine, Duration::from_secs(5)).await;

        let err = handler
            .transcribe(&Upload::new("a.wav", b"audio".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Engine(msg) if msg.contains("CUDA")));
        assert_eq!(cache.status().await.unwrap().audio_files_count, 0);
    }

    #[tokio::test]
    async fn test_timeout_releases_file() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Hang));
        let (_dir, cache, handler) = handler(engine, Duration::from_millis(30)).await;

        let err = handler
            .transcribe(&Upload::new("a.wav", b"audio".to_vec()))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Engine(_)));
        assert_eq!(cache.status().await.unwrap().audio_files_count, 0);
    }

    #[tokio::test]
    async fn test_dropped_request_releases_file() {
        let (engine, _gate) = ScriptedEngine::gated(Behaviour::Annotate);
        let engine = Arc::new(engine);
        let (_dir, cache, handler) = handler(engine.clone(), Duration::from_secs(5)).await;
        let upload = Upload::new("a.wav", b"audio".to_vec());

        // Client disconnects while the engine is still working
        let pending =
            tokio::time::timeout(Duration::from_millis(50), handler.transcribe(&upload)).await;
        assert!(pending.is_err());
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(cache.status().await.unwrap().audio_files_count, 0);
    }
}
