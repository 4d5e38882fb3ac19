//! Uploaded audio held in memory between the HTTP layer and the cache.

use crate::error::{AppError, AppResult};

/// One uploaded file as received from the client.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub filename: String,
    pub content: Vec<u8>,
}

impl Upload {
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }

    /// Reject uploads nothing downstream could use. Runs before anything is
    /// written to the cache.
    pub fn validate(&self, max_bytes: usize) -> AppResult<()> {
        if self.filename.trim().is_empty() {
            return Err(AppError::Validation("No file provided".to_string()));
        }
        if self.content.is_empty() {
            return Err(AppError::Validation(format!("File '{}' is empty", self.filename)));
        }
        if self.content.len() > max_bytes {
            return Err(AppError::Validation(format!(
                "File '{}' too large: {} bytes (max: {} bytes)",
                self.filename,
                self.content.len(),
                max_bytes
            )));
        }
        Ok(())
    }
}
