use crate::state::AppState;
use crate::transcription::TaskStatus;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let config = &state.config;
    let cache_ready = state.cache.area_dirs_exist().await;

    HttpResponse::Ok().json(json!({
        "status": if cache_ready { "healthy" } else { "degraded" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.get_uptime_seconds(),
        "service": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate()
        },
        "tasks": task_counts(&state),
        "workers": state.pool.workers(),
        "cache": {
            "root": state.cache.root(),
            "ready": cache_ready
        },
        "engine": state.engine_description
    }))
}

pub async fn detailed_metrics(state: web::Data<AppState>) -> HttpResponse {
    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();

    let mut endpoint_stats: Vec<_> = metrics
        .endpoint_metrics
        .iter()
        .map(|(endpoint, metric)| {
            json!({
                "endpoint": endpoint,
                "request_count": metric.request_count,
                "error_count": metric.error_count,
                "error_rate": metric.error_rate(),
                "average_duration_ms": metric.average_duration_ms(),
                "total_duration_ms": metric.total_duration_ms
            })
        })
        .collect();
    endpoint_stats.sort_by(|a, b| a["endpoint"].as_str().cmp(&b["endpoint"].as_str()));

    HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "error_rate": metrics.error_rate(),
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "tasks": task_counts(&state),
        "workers": {
            "max_concurrent_jobs": state.pool.workers()
        }
    }))
}

fn task_counts(state: &AppState) -> serde_json::Value {
    let counts = state.registry.status_counts();
    let count = |status: TaskStatus| counts.get(&status).copied().unwrap_or(0);
    json!({
        "total": state.registry.len(),
        "pending": count(TaskStatus::Pending),
        "processing": count(TaskStatus::Processing),
        "completed": count(TaskStatus::Completed),
        "failed": count(TaskStatus::Failed)
    })
}
