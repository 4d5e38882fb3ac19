//! # Application State Management
//!
//! Shared state handed to every HTTP handler through `web::Data<AppState>`.
//!
//! ## Key Rust Concepts:
//!
//! ### Arc (Atomically Reference Counted)
//! - Every actix worker thread holds a clone of `AppState`; the `Arc`s inside
//!   make that clone cheap and point all of them at the same cache, registry
//!   and worker pool
//!
//! ### Locks
//! - The components that change at runtime (`TaskRegistry`, `CacheStore`)
//!   handle their own synchronization, so they sit behind a plain `Arc`
//! - Request metrics are a small struct updated on every request; a
//!   `RwLock` is enough. A poisoned lock is recovered rather than panicking,
//!   since counters are still usable after a panic elsewhere
//!
//! Configuration is read-only after startup and shared as `Arc<AppConfig>`.

use crate::cache::CacheStore;
use crate::config::AppConfig;
use crate::transcription::{
    BatchOrchestrator, InferenceEngine, SingleRequestHandler, TaskRegistry, WorkerPool,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// The main application state shared across all HTTP request handlers.
#[derive(Clone)]
pub struct AppState {
    /// Effective configuration, fixed at startup
    pub config: Arc<AppConfig>,

    /// Transient audio and manifest files
    pub cache: Arc<CacheStore>,

    /// Batch task state, polled by clients
    pub registry: Arc<TaskRegistry>,

    /// Synchronous one-file transcription
    pub single: Arc<SingleRequestHandler>,

    /// Background execution of batch tasks
    pub pool: Arc<WorkerPool>,

    /// Human-readable engine description for health output
    pub engine_description: String,

    /// Request counters updated by the metrics middleware
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,
}

/// Request metrics collected across all HTTP requests.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Requests that ended with a 4xx or 5xx status
    pub error_count: u64,

    /// Key: `"<METHOD> <route pattern>"`, e.g. `"GET /task-status/{task_id}"`
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Performance metrics for one route.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    /// Wire up every component around `engine`.
    ///
    /// Must be called from inside a tokio runtime: the worker pool spawns
    /// its workers immediately.
    pub fn new(config: AppConfig, engine: Arc<dyn InferenceEngine>) -> Self {
        let cache = Arc::new(CacheStore::new(config.cache.root_dir.clone()));
        let registry = Arc::new(TaskRegistry::new());
        let engine_timeout = config.engine.timeout();

        let single = Arc::new(SingleRequestHandler::new(
            cache.clone(),
            engine.clone(),
            config.decode,
            engine_timeout,
        ));
        let orchestrator = Arc::new(BatchOrchestrator::new(
            cache.clone(),
            registry.clone(),
            engine.clone(),
            config.decode,
            engine_timeout,
        ));
        let pool = Arc::new(WorkerPool::start(
            orchestrator,
            config.workers.max_concurrent_jobs,
        ));

        Self {
            config: Arc::new(config),
            cache,
            registry,
            single,
            pool,
            engine_description: engine.describe(),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.request_count += 1;
    }

    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        metrics.error_count += 1;
    }

    /// Record one finished request against its route.
    ///
    /// The first request to a route creates its entry with `or_default()`.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Copy of the current metrics, so the lock isn't held while serializing.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl AppMetrics {
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, 0.0 to 1.0.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}
