//! # Batch Orchestrator
//!
//! Runs one batch task from `processing` to a terminal state:
//!
//! 1. Mark the task `processing`
//! 2. Write every upload into the audio area (any failure aborts the batch)
//! 3. Write a manifest listing those files
//! 4. Run the engine over the manifest, under the engine timeout
//! 5. Read the annotated manifest and pair each row with its upload
//! 6. Release every cached file, then mark the task `completed` or `failed`
//!
//! Files are held as [`CacheLease`]s from the moment they are written, so
//! they are removed on every exit path: normal release in step 6, or the
//! lease's `Drop` if the run is cancelled or panics.
//!
//! Nothing here returns an error to the caller. Failures end up in the task's
//! `errors` list, because the client that submitted the batch is long gone.

use crate::cache::manifest::{self, ManifestRow};
use crate::cache::{CacheLease, CacheStore};
use crate::config::DecodeParams;
use crate::error::{AppError, AppResult};
use crate::transcription::engine::{with_deadline, InferenceEngine};
use crate::transcription::registry::{TaskId, TaskRegistry, TaskTransition};
use crate::transcription::result::{FileResult, RowOutcome, Transcription};
use crate::transcription::upload::Upload;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Work item queued for the worker pool.
#[derive(Debug)]
pub struct BatchJob {
    pub task_id: TaskId,
    pub uploads: Vec<Upload>,
}

pub struct BatchOrchestrator {
    cache: Arc<CacheStore>,
    registry: Arc<TaskRegistry>,
    engine: Arc<dyn InferenceEngine>,
    params: DecodeParams,
    engine_timeout: Duration,
}

impl BatchOrchestrator {
    pub fn new(
        cache: Arc<CacheStore>,
        registry: Arc<TaskRegistry>,
        engine: Arc<dyn InferenceEngine>,
        params: DecodeParams,
        engine_timeout: Duration,
    ) -> Self {
        Self {
            cache,
            registry,
            engine,
            params,
            engine_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    /// Drive `job` to a terminal state.
    pub async fn run(&self, job: BatchJob) {
        let task_id = job.task_id;
        if let Err(e) = self.registry.transition(&task_id, TaskTransition::Start) {
            tracing::warn!(task_id = %task_id, "Not starting batch: {}", e);
            return;
        }

        let start_time = Instant::now();
        tracing::info!(task_id = %task_id, files = job.uploads.len(), "Batch started");

        let mut leases = Vec::with_capacity(job.uploads.len() + 1);
        let outcome = self.execute(&job.uploads, &mut leases).await;

        for lease in leases {
            lease.release(&self.cache).await;
        }

        let transition = match outcome {
            Ok(results) => {
                tracing::info!(
                    task_id = %task_id,
                    files = results.len(),
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Batch completed"
                );
                TaskTransition::Complete(results)
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    duration_ms = start_time.elapsed().as_millis() as u64,
                    "Batch failed: {}",
                    e
                );
                TaskTransition::Fail(e.to_string())
            }
        };

        if let Err(e) = self.registry.transition(&task_id, transition) {
            tracing::error!(task_id = %task_id, "Could not record batch outcome: {}", e);
        }
    }

    /// Steps 2–5. Every file written is pushed onto `leases` before the next
    /// fallible step, so the caller can always release it.
    async fn execute(
        &self,
        uploads: &[Upload],
        leases: &mut Vec<CacheLease>,
    ) -> AppResult<Vec<FileResult>> {
        let mut audio = Vec::with_capacity(uploads.len());
        for upload in uploads {
            let entry = self.cache.store(&upload.content, &upload.filename).await?;
            audio.push(entry.clone());
            leases.push(CacheLease::new(entry));
        }

        let manifest_entry = manifest::write(&self.cache, &audio).await?;
        let manifest_path = manifest_entry.path.clone();
        leases.push(CacheLease::new(manifest_entry));

        with_deadline(
            self.engine_timeout,
            self.engine.decode_manifest(&manifest_path, &self.params),
        )
        .await?;

        let rows = manifest::read(&manifest_path).await?;
        let written: Vec<String> = audio
            .iter()
            .map(|entry| entry.path.to_string_lossy().into_owned())
            .collect();
        correlate(uploads, &written, rows)
    }
}

/// Pair manifest rows with uploads by position.
///
/// The row count must match and each row must still name the file written at
/// that position; anything else means the engine reordered or dropped rows
/// and the filename mapping can't be trusted. Unusable output in a single row
/// only marks that row `invalid`.
fn correlate(
    uploads: &[Upload],
    written_paths: &[String],
    rows: Vec<ManifestRow>,
) -> AppResult<Vec<FileResult>> {
    if rows.len() != uploads.len() {
        return Err(AppError::Parse(format!(
            "manifest has {} rows, expected {}",
            rows.len(),
            uploads.len()
        )));
    }

    uploads
        .iter()
        .zip(written_paths)
        .zip(rows)
        .enumerate()
        .map(|(idx, ((upload, written), row))| {
            if row.input_path != *written {
                return Err(AppError::Parse(format!(
                    "manifest row {} names {}, expected {}",
                    idx + 1,
                    row.input_path,
                    written
                )));
            }

            let empty = || Transcription::Text(String::new());
            let (transcription, outcome, error) = match row.decode {
                Some(raw) => match Transcription::from_engine_output(&raw) {
                    Ok(transcription) => {
                        if transcription.is_empty() {
                            tracing::debug!(row = idx + 1, "Engine output for row is empty");
                        }
                        (transcription, RowOutcome::Decoded, None)
                    }
                    Err(e) => {
                        tracing::warn!(row = idx + 1, "Rejected engine output: {}", e);
                        (empty(), RowOutcome::Invalid, Some(e))
                    }
                },
                None => (empty(), RowOutcome::Missing, None),
            };

            Ok(FileResult {
                filename: upload.filename.clone(),
                transcription,
                outcome,
                error,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::store::CacheArea;
    use crate::transcription::registry::TaskStatus;
    use crate::transcription::testing::{Behaviour, ScriptedEngine};
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: Arc<CacheStore>,
        registry: Arc<TaskRegistry>,
        orchestrator: BatchOrchestrator,
    }

    async fn fixture(engine: Arc<dyn InferenceEngine>, timeout: Duration) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        cache.ensure().await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        let orchestrator = BatchOrchestrator::new(
            cache.clone(),
            registry.clone(),
            engine,
            DecodeParams::default(),
            timeout,
        );
        Fixture {
            _dir: dir,
            cache,
            registry,
            orchestrator,
        }
    }

    fn uploads() -> Vec<Upload> {
        vec![
            Upload::new("first.wav", b"one".to_vec()),
            Upload::new("second.mp3", b"two".to_vec()),
        ]
    }

    async fn cached_files(cache: &CacheStore) -> usize {
        let status = cache.status().await.unwrap();
        status.audio_files_count + status.tsv_files_count
    }

    #[tokio::test]
    async fn test_successful_batch_completes_and_cleans_up() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Annotate));
        let fx = fixture(engine.clone(), Duration::from_secs(5)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.errors.is_empty());
        assert_eq!(task.results.len(), 2);
        assert_eq!(task.results[0].filename, "first.wav");
        assert_eq!(task.results[1].filename, "second.mp3");
        assert_eq!(task.results[0].outcome, RowOutcome::Decoded);
        match &task.results[1].transcription {
            Transcription::Text(text) => {
                assert!(text.starts_with("decoded ") && text.ends_with(".mp3"))
            }
            other => panic!("expected text, got {:?}", other),
        }

        let seen = engine.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].starts_with(fx.cache.area_dir(CacheArea::Manifest)));
        assert_eq!(cached_files(&fx.cache).await, 0);
    }

    #[tokio::test]
    async fn test_engine_failure_marks_task_failed_and_cleans_up() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Fail));
        let fx = fixture(engine, Duration::from_secs(5)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.errors.len(), 1);
        assert!(task.errors[0].contains("CUDA out of memory"));
        assert!(task.results.is_empty());
        assert_eq!(cached_files(&fx.cache).await, 0);
    }

    #[tokio::test]
    async fn test_engine_timeout_fails_task() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Hang));
        let fx = fixture(engine, Duration::from_millis(50)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.errors[0].contains("timed out"));
        assert_eq!(cached_files(&fx.cache).await, 0);
    }

    #[tokio::test]
    async fn test_missing_output_column_is_reported_per_row() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::LeaveUntouched));
        let fx = fixture(engine, Duration::from_secs(5)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        for result in &task.results {
            assert_eq!(result.outcome, RowOutcome::Missing);
            assert_eq!(result.transcription, Transcription::Text(String::new()));
        }
    }

    #[tokio::test]
    async fn test_reordered_manifest_is_rejected() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Reorder));
        let fx = fixture(engine, Duration::from_secs(5)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.errors[0].contains("Manifest parse error"));
        assert_eq!(cached_files(&fx.cache).await, 0);
    }

    #[tokio::test]
    async fn test_write_failure_aborts_before_engine() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Annotate));
        let fx = fixture(engine.clone(), Duration::from_secs(5)).await;
        // Audio area replaced by a file: every store fails
        let audio_dir = fx.cache.area_dir(CacheArea::Audio);
        std::fs::remove_dir_all(&audio_dir).unwrap();
        std::fs::write(&audio_dir, b"blocker").unwrap();

        let task_id = fx.registry.create();
        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.errors[0].contains("Cache write error"));
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_terminal_task_is_not_rerun() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::Annotate));
        let fx = fixture(engine.clone(), Duration::from_secs(5)).await;
        let task_id = fx.registry.create();
        fx.registry
            .transition(&task_id, TaskTransition::Fail("cancelled".into()))
            .unwrap();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.errors, vec!["cancelled".to_string()]);
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert_eq!(cached_files(&fx.cache).await, 0);
    }

    #[test]
    fn test_correlate_checks_row_count() {
        let err = correlate(&uploads(), &["/a".into(), "/b".into()], vec![]).unwrap_err();
        assert!(matches!(err, AppError::Parse(_)));
    }

    #[test]
    fn test_correlate_parses_segment_output() {
        let rows = vec![ManifestRow {
            input_path: "/a".into(),
            decode: Some(r#"[{"start":0.0,"end":0.5,"decode":"hi"}]"#.into()),
        }];
        let results = correlate(&uploads()[..1], &["/a".into()], rows).unwrap();
        assert!(matches!(
            results[0].transcription,
            Transcription::Segments(ref s) if s.len() == 1
        ));
    }

    #[test]
    fn test_correlate_keeps_good_rows_next_to_a_bad_one() {
        let rows = vec![
            ManifestRow {
                input_path: "/a".into(),
                decode: Some("good text".into()),
            },
            ManifestRow {
                input_path: "/b".into(),
                decode: Some(r#"[{"start":1.0,"end":0.999,"decode":"x"}]"#.into()),
            },
        ];
        let results = correlate(&uploads(), &["/a".into(), "/b".into()], rows).unwrap();

        assert_eq!(results[0].outcome, RowOutcome::Decoded);
        assert_eq!(results[0].transcription, Transcription::Text("good text".into()));
        assert_eq!(results[0].error, None);

        assert_eq!(results[1].filename, "second.mp3");
        assert_eq!(results[1].outcome, RowOutcome::Invalid);
        assert_eq!(results[1].transcription, Transcription::Text(String::new()));
        assert!(results[1].error.as_deref().unwrap().contains("ends before it starts"));
    }

    #[tokio::test]
    async fn test_one_invalid_row_does_not_fail_the_batch() {
        let engine = Arc::new(ScriptedEngine::new(Behaviour::InvalidSecondRow));
        let fx = fixture(engine, Duration::from_secs(5)).await;
        let task_id = fx.registry.create();

        fx.orchestrator
            .run(BatchJob {
                task_id,
                uploads: uploads(),
            })
            .await;

        let task = fx.registry.get(&task_id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.errors.is_empty());
        assert_eq!(task.results[0].outcome, RowOutcome::Decoded);
        assert_eq!(task.results[1].outcome, RowOutcome::Invalid);
        assert!(task.results[1].error.is_some());
        assert_eq!(cached_files(&fx.cache).await, 0);
    }
}
