//! # Transcription Endpoints
//!
//! ## Available Endpoints:
//! - `POST /transcribe_audio/`, `POST /api/v1/transcribe`: one file, waits for
//!   the engine and returns `{"transcription": ...}`
//! - `POST /batch-transcribe`, `POST /api/v1/batch`: up to
//!   `cache.max_batch_files` files, returns `202 {"task_id": ...}` straight away
//!
//! Both take `multipart/form-data`. Every upload is validated before anything
//! is written to the cache.

use crate::error::{AppError, AppResult};
use crate::handlers::upload::{read_uploads, UploadLimits};
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Transcribe the first file part of the request.
///
/// ## Response:
/// ```json
/// { "transcription": "xin chào" }
/// ```
/// or, when the engine returns timestamps,
/// ```json
/// { "transcription": [{ "start": 0.0, "end": 1.2, "decode": "xin chào" }] }
/// ```
pub async fn transcribe_audio(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let limits = UploadLimits::from_config(&state.config.cache);
    let upload = read_uploads(&mut payload, limits)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AppError::Validation("No file provided".to_string()))?;
    upload.validate(limits.max_file_bytes)?;

    let transcription = state.single.transcribe(&upload).await?;

    Ok(HttpResponse::Ok().json(json!({ "transcription": transcription })))
}

/// Queue every file part as one batch task.
pub async fn batch_transcribe(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> AppResult<HttpResponse> {
    let limits = UploadLimits::from_config(&state.config.cache);
    let uploads = read_uploads(&mut payload, limits).await?;
    if uploads.is_empty() {
        return Err(AppError::Validation("No files provided".to_string()));
    }
    for upload in &uploads {
        upload.validate(limits.max_file_bytes)?;
    }

    let task_id = state.pool.submit(uploads)?;

    Ok(HttpResponse::Accepted().json(json!({ "task_id": task_id })))
}
