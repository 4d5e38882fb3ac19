//! Cache maintenance endpoints.

use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Run a sweep now with the configured max age.
pub async fn cleanup_cache(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let report = state.cache.sweep(state.config.cache.max_age()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Cache cleanup completed",
        "areas_scanned": report.areas_scanned,
        "files_removed": report.files_removed,
        "failures": report.failures,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Area paths, existence flags, file counts and total size.
pub async fn cache_status(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let status = state.cache.status().await?;
    Ok(HttpResponse::Ok().json(status))
}
