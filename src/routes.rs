//! # Route Table
//!
//! The `/api/v1` scope is the primary surface. The unversioned paths are
//! kept as aliases for clients written against the earlier API.
//!
//! | Method | Path                                        | Handler            |
//! |--------|---------------------------------------------|--------------------|
//! | GET    | `/health`, `/api/v1/health`                 | health check       |
//! | GET    | `/api/v1/metrics`                           | request metrics    |
//! | GET    | `/api/v1/config`                            | effective config   |
//! | POST   | `/transcribe_audio/`, `/api/v1/transcribe`  | single file        |
//! | POST   | `/batch-transcribe`, `/api/v1/batch`        | batch submission   |
//! | GET    | `/task-status/{id}`, `/api/v1/tasks/{id}`   | batch poll         |
//! | POST   | `/cache/cleanup`, `/api/v1/cache/cleanup`   | manual sweep       |
//! | GET    | `/cache/status`, `/api/v1/cache/status`     | cache diagnostics  |

use crate::{handlers, health};
use actix_web::web;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/health", web::get().to(health::health_check))
            .route("/metrics", web::get().to(health::detailed_metrics))
            .route("/config", web::get().to(handlers::get_config))
            .route("/transcribe", web::post().to(handlers::transcribe_audio))
            .route("/batch", web::post().to(handlers::batch_transcribe))
            .route("/tasks/{task_id}", web::get().to(handlers::get_task_status))
            .route("/cache/cleanup", web::post().to(handlers::cleanup_cache))
            .route("/cache/status", web::get().to(handlers::cache_status)),
    )
    .route("/health", web::get().to(health::health_check))
    .route("/transcribe_audio/", web::post().to(handlers::transcribe_audio))
    .route("/batch-transcribe", web::post().to(handlers::batch_transcribe))
    .route("/task-status/{task_id}", web::get().to(handlers::get_task_status))
    .route("/cache/cleanup", web::post().to(handlers::cleanup_cache))
    .route("/cache/status", web::get().to(handlers::cache_status));
}
