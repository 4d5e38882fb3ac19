//! Multipart body parsing shared by the transcription endpoints.

use crate::config::CacheConfig;
use crate::error::{AppError, AppResult};
use crate::transcription::Upload;
use actix_multipart::{Field, Multipart};
use futures_util::stream::StreamExt;

/// Field names that carry files even when the client omits `filename=`.
const FILE_FIELDS: [&str; 2] = ["file", "files"];

/// Caps applied while a request body is read.
#[derive(Debug, Clone, Copy)]
pub struct UploadLimits {
    pub max_file_bytes: usize,
    pub max_files: usize,
    pub max_total_bytes: usize,
}

impl UploadLimits {
    pub fn from_config(cache: &CacheConfig) -> Self {
        Self {
            max_file_bytes: cache.max_upload_bytes(),
            max_files: cache.max_batch_files,
            max_total_bytes: cache.max_batch_bytes(),
        }
    }
}

/// Read every file part of `payload` into memory, in request order.
///
/// A part counts as a file if it has a `filename` parameter or is named
/// `file`/`files`; other form fields are skipped. Reading stops with a
/// validation error as soon as a part exceeds the per-file cap, the request
/// exceeds the total cap, or one file part too many arrives, so an oversized
/// request is never buffered in full.
pub async fn read_uploads(
    payload: &mut Multipart,
    limits: UploadLimits,
) -> AppResult<Vec<Upload>> {
    let mut uploads = Vec::new();
    let mut total_bytes = 0usize;

    while let Some(item) = payload.next().await {
        let mut field: Field =
            item.map_err(|e| AppError::Validation(format!("Multipart error: {}", e)))?;

        let (is_file, filename) = match field.content_disposition() {
            Some(disposition) => {
                let filename = disposition.get_filename().map(str::to_string);
                let named_file = disposition
                    .get_name()
                    .map(|name| FILE_FIELDS.contains(&name))
                    .unwrap_or(false);
                (filename.is_some() || named_file, filename.unwrap_or_default())
            }
            None => (false, String::new()),
        };

        if !is_file {
            // Drain and ignore non-file fields
            while let Some(chunk) = field.next().await {
                chunk.map_err(|e| AppError::Validation(format!("Chunk error: {}", e)))?;
            }
            continue;
        }

        if uploads.len() >= limits.max_files {
            return Err(AppError::Validation(format!(
                "Too many files (max: {} per request)",
                limits.max_files
            )));
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| AppError::Validation(format!("Chunk error: {}", e)))?;
            if bytes.len() + chunk.len() > limits.max_file_bytes {
                return Err(AppError::Validation(format!(
                    "File '{}' too large (max: {} bytes)",
                    filename, limits.max_file_bytes
                )));
            }
            if total_bytes + chunk.len() > limits.max_total_bytes {
                return Err(AppError::Validation(format!(
                    "Request too large (max: {} bytes across all files)",
                    limits.max_total_bytes
                )));
            }
            total_bytes += chunk.len();
            bytes.extend_from_slice(&chunk);
        }

        uploads.push(Upload::new(filename, bytes));
    }

    Ok(uploads)
}
