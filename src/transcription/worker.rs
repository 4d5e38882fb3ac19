//! # Batch Worker Pool
//!
//! Submission and execution are decoupled by a channel: HTTP handlers call
//! [`WorkerPool::submit`], which registers the task and enqueues the job, and
//! returns the id straight away. A fixed number of worker tasks take jobs off
//! the queue and run them through the [`BatchOrchestrator`].
//!
//! ## Concurrency Model:
//! - The number of workers caps how many batches run the engine at once
//! - The queue itself is unbounded; waiting jobs stay `pending`
//! - Each job runs in its own spawned task, so a panic inside one batch is
//!   caught by the worker, the task is marked `failed`, and the worker moves
//!   on to the next job
//!
//! After [`WorkerPool::close`] no new jobs are accepted; jobs already queued
//! are still drained.

use crate::error::{AppError, AppResult};
use crate::transcription::batch::{BatchJob, BatchOrchestrator};
use crate::transcription::registry::{TaskId, TaskRegistry, TaskTransition};
use crate::transcription::upload::Upload;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct WorkerPool {
    sender: Mutex<Option<mpsc::UnboundedSender<BatchJob>>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    registry: Arc<TaskRegistry>,
    workers: usize,
}

impl WorkerPool {
    /// Spawn `workers` worker tasks on the current runtime.
    pub fn start(orchestrator: Arc<BatchOrchestrator>, workers: usize) -> Self {
        let workers = workers.max(1);
        let (sender, receiver) = mpsc::unbounded_channel();
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let handles = (0..workers)
            .map(|worker_id| {
                tokio::spawn(worker_loop(worker_id, orchestrator.clone(), receiver.clone()))
            })
            .collect();

        tracing::info!(workers, "Batch worker pool started");

        Self {
            sender: Mutex::new(Some(sender)),
            handles: Mutex::new(handles),
            registry: orchestrator.registry().clone(),
            workers,
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Register a `pending` task for `uploads` and queue it.
    pub fn submit(&self, uploads: Vec<Upload>) -> AppResult<TaskId> {
        let task_id = self.registry.create();
        let job = BatchJob { task_id, uploads };

        let sent = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|sender| sender.send(job).is_ok())
            .unwrap_or(false);

        if !sent {
            let reason = "batch worker pool is shut down".to_string();
            if let Err(e) = self
                .registry
                .transition(&task_id, TaskTransition::Fail(reason.clone()))
            {
                tracing::error!(task_id = %task_id, "Could not fail rejected task: {}", e);
            }
            return Err(AppError::Internal(reason));
        }

        tracing::info!(task_id = %task_id, "Batch queued");
        Ok(task_id)
    }

    /// Stop accepting jobs. Workers exit once the queue is empty.
    pub fn close(&self) {
        if self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            tracing::info!("Batch worker pool closed");
        }
    }

    /// Close the pool and wait for every worker to finish.
    pub async fn shutdown(&self) {
        self.close();
        let handles = {
            let mut guard = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *guard)
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Batch worker ended abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    orchestrator: Arc<BatchOrchestrator>,
    receiver: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<BatchJob>>>,
) {
    loop {
        // Hold the receiver lock only while waiting for the next job
        let job = receiver.lock().await.recv().await;
        let Some(job) = job else { break };
        let task_id = job.task_id;

        tracing::debug!(worker_id, task_id = %task_id, "Worker picked up batch");

        let run = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.run(job).await })
        };

        if let Err(e) = run.await {
            tracing::error!(worker_id, task_id = %task_id, "Batch crashed: {}", e);
            let reason = format!("batch worker crashed: {}", e);
            if let Err(e) = orchestrator
                .registry()
                .transition(&task_id, TaskTransition::Fail(reason))
            {
                tracing::error!(task_id = %task_id, "Could not fail crashed task: {}", e);
            }
        }
    }

    tracing::debug!(worker_id, "Batch worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheStore;
    use crate::config::DecodeParams;
    use crate::transcription::engine::InferenceEngine;
    use crate::transcription::registry::TaskStatus;
    use crate::transcription::testing::{Behaviour, ScriptedEngine};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        cache: Arc<CacheStore>,
        registry: Arc<TaskRegistry>,
        pool: WorkerPool,
    }

    async fn fixture(engine: Arc<dyn InferenceEngine>, workers: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(CacheStore::new(dir.path()));
        cache.ensure().await.unwrap();
        let registry = Arc::new(TaskRegistry::new());
        let orchestrator = Arc::new(BatchOrchestrator::new(
            cache.clone(),
            registry.clone(),
            engine,
            DecodeParams::default(),
            Duration::from_secs(5),
        ));
        Fixture {
            _dir: dir,
            cache,
            registry,
            pool: WorkerPool::start(orchestrator, workers),
        }
    }

    fn batch() -> Vec<Upload> {
        vec![
            Upload::new("a.wav", b"aaa".to_vec()),
            Upload::new("b.wav", b"bbb".to_vec()),
        ]
    }

    async fn wait_for_terminal(registry: &TaskRegistry, id: &TaskId) -> TaskStatus {
        for _ in 0..500 {
            let status = registry.get(id).unwrap().status;
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never finished", id);
    }

    #[tokio::test]
    async fn test_submit_returns_before_engine_runs() {
        let (engine, gate) = ScriptedEngine::gated(Behaviour::Annotate);
        let fx = fixture(Arc::new(engine), 1).await;

        let first = fx.pool.submit(batch()).unwrap();
        let second = fx.pool.submit(batch()).unwrap();

        let status = fx.registry.get(&first).unwrap().status;
        assert!(matches!(status, TaskStatus::Pending | TaskStatus::Processing));
        assert_eq!(fx.registry.get(&second).unwrap().status, TaskStatus::Pending);

        gate.add_permits(2);
        assert_eq!(wait_for_terminal(&fx.registry, &first).await, TaskStatus::Completed);
        assert_eq!(wait_for_terminal(&fx.registry, &second).await, TaskStatus::Completed);

        let task = fx.registry.get(&second).unwrap();
        let names: Vec<_> = task.results.iter().map(|r| r.filename.as_str()).collect();
        assert_eq!(names, vec!["a.wav", "b.wav"]);
    }

    #[tokio::test]
    async fn test_worker_count_limits_concurrent_batches() {
        let (engine, gate) = ScriptedEngine::gated(Behaviour::Annotate);
        let engine = Arc::new(engine);
        let fx = fixture(engine.clone(), 2).await;

        let ids: Vec<_> = (0..4).map(|_| fx.pool.submit(batch()).unwrap()).collect();

        // Give both workers time to pick up a job and block on the gate
        for _ in 0..200 {
            if engine.calls.load(std::sync::atomic::Ordering::SeqCst) == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        gate.add_permits(4);
        for id in &ids {
            assert_eq!(wait_for_terminal(&fx.registry, id).await, TaskStatus::Completed);
        }
    }

    #[tokio::test]
    async fn test_panicking_batch_fails_task_and_keeps_worker_alive() {
        let fx = fixture(Arc::new(ScriptedEngine::new(Behaviour::Panic)), 1).await;

        let first = fx.pool.submit(batch()).unwrap();
        let second = fx.pool.submit(batch()).unwrap();

        for id in [first, second] {
            assert_eq!(wait_for_terminal(&fx.registry, &id).await, TaskStatus::Failed);
            let task = fx.registry.get(&id).unwrap();
            assert!(task.errors[0].contains("batch worker crashed"));
        }

        let status = fx.cache.status().await.unwrap();
        assert_eq!(status.audio_files_count + status.tsv_files_count, 0);
    }

    #[tokio::test]
    async fn test_submit_after_close_fails_task() {
        let fx = fixture(Arc::new(ScriptedEngine::new(Behaviour::Annotate)), 1).await;
        fx.pool.close();

        let err = fx.pool.submit(batch()).unwrap_err();
        assert!(matches!(err, AppError::Internal(_)));
        assert_eq!(fx.registry.len(), 1);
        assert_eq!(
            fx.registry.status_counts().get(&TaskStatus::Failed),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_jobs() {
        let fx = fixture(Arc::new(ScriptedEngine::new(Behaviour::Annotate)), 1).await;
        let ids: Vec<_> = (0..3).map(|_| fx.pool.submit(batch()).unwrap()).collect();

        fx.pool.shutdown().await;

        for id in ids {
            assert_eq!(fx.registry.get(&id).unwrap().status, TaskStatus::Completed);
        }
    }
}
