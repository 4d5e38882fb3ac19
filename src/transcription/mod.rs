//! # Transcription Module
//!
//! Everything between a validated upload and a transcription result.
//!
//! ## Key Components:
//! - **Engine**: the [`InferenceEngine`] seam and the subprocess adapter
//! - **Registry**: batch task state and its transition rules
//! - **Batch**: the orchestrator that drives one batch task to completion
//! - **Worker**: the pool that runs batches in the background
//! - **Single**: the synchronous one-file path
//!
//! ## Flow:
//! ```text
//! single: Upload ─► CacheStore ─► engine.transcribe_file ─► release ─► Transcription
//! batch:  Uploads ─► WorkerPool ─► CacheStore ─► manifest ─► engine.decode_manifest
//!                                   ─► manifest rows ─► release ─► TaskRegistry
//! ```

pub mod batch; // Batch orchestration
pub mod engine; // Inference engine trait and subprocess adapter
pub mod registry; // Task state
pub mod result; // Transcription result types
pub mod single; // One-shot requests
pub mod upload; // Upload validation
pub mod worker; // Background worker pool

#[cfg(test)]
pub mod testing;

pub use batch::BatchOrchestrator;
pub use engine::{CommandEngine, InferenceEngine};
pub use registry::{TaskId, TaskRegistry, TaskStatus};
pub use single::SingleRequestHandler;
pub use upload::Upload;
pub use worker::WorkerPool;
