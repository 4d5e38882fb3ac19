//! # Configuration Management
//!
//! Loads the gateway configuration from multiple sources:
//! - Default values (built into the code)
//! - TOML configuration file (config.toml, optional)
//! - Environment variables (with APP_ prefix, `__` between nested keys)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Deployment shortcuts: `HOST`, `PORT`, `ASR_CACHE_DIR`, `MODEL_CHECKPOINT`
//! 2. Environment variables (`APP_SERVER__PORT`, `APP_DECODE__CHUNK_SIZE`, ...)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impls)
//!
//! The loaded configuration is immutable for the lifetime of the process.
//! Handlers get a shared reference through `AppState`.

use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub decode: DecodeParams,
    pub engine: EngineConfig,
    pub workers: WorkerConfig,
}

/// Address the HTTP server binds to.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// On-disk cache for uploaded audio and batch manifests.
///
/// ## Fields:
/// - `root_dir`: parent of the `audio/` and `tsv/` areas
/// - `max_age_hours`: files older than this are removed by the sweep
/// - `sweep_interval_minutes`: period of the background sweeper, 0 disables it
/// - `max_upload_mb`: largest single upload accepted
/// - `max_batch_files`: most file parts accepted in one request
/// - `max_batch_mb`: most bytes accepted across all files of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root_dir: PathBuf,
    pub max_age_hours: u64,
    pub sweep_interval_minutes: u64,
    pub max_upload_mb: u64,
    pub max_batch_files: usize,
    pub max_batch_mb: u64,
}

/// Decoding knobs handed to the inference engine verbatim.
///
/// The gateway never interprets these values. They are validated only for
/// being non-zero, since a zero chunk or window makes the engine reject the
/// job after we've already cached the upload.
///
/// ## Defaults:
/// - `chunk_size = 64`
/// - `left_context_size = 128`
/// - `right_context_size = 128`
/// - `total_batch_duration = 1800` (seconds of audio per engine batch)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodeParams {
    pub chunk_size: u32,
    pub left_context_size: u32,
    pub right_context_size: u32,
    pub total_batch_duration: u32,
}

/// How to launch the external decoder process.
///
/// The resulting command line is
/// `<program> <script> --model_checkpoint <dir> ... <extra_args>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub program: String,
    pub script: String,
    pub model_checkpoint: PathBuf,
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
}

/// Background worker pool for batch jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of batches that may run the engine at the same time
    pub max_concurrent_jobs: usize,
}

impl Default for DecodeParams {
    fn default() -> Self {
        Self {
            chunk_size: 64,
            left_context_size: 128,
            right_context_size: 128,
            total_batch_duration: 1800,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            cache: CacheConfig {
                root_dir: PathBuf::from("./cache"),
                max_age_hours: 24,
                sweep_interval_minutes: 60,
                max_upload_mb: 200,
                max_batch_files: 100,
                max_batch_mb: 2048,
            },
            decode: DecodeParams::default(),
            engine: EngineConfig {
                program: "python".to_string(),
                script: "decode.py".to_string(),
                model_checkpoint: PathBuf::from("chunkformer-large-vie"),
                device: None,
                extra_args: Vec::new(),
                timeout_secs: 3600,
            },
            workers: WorkerConfig {
                max_concurrent_jobs: 2,
            },
        }
    }
}

impl CacheConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_hours * 3600)
    }

    /// `None` when the periodic sweeper is disabled.
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.sweep_interval_minutes {
            0 => None,
            minutes => Some(Duration::from_secs(minutes * 60)),
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        (self.max_upload_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn max_batch_bytes(&self) -> usize {
        (self.max_batch_mb as usize).saturating_mul(1024 * 1024)
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__PORT=3000`: Override server port
    /// - `APP_CACHE__MAX_AGE_HOURS=6`: Shorter cache retention
    /// - `APP_WORKERS__MAX_CONCURRENT_JOBS=4`: More parallel batches
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special case for deployment platforms
    /// - `ASR_CACHE_DIR=/var/cache/asr`: Cache root
    /// - `MODEL_CHECKPOINT=/models/large`: Checkpoint directory for the engine
    pub fn load() -> AppResult<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        if let Ok(dir) = env::var("ASR_CACHE_DIR") {
            settings = settings.set_override("cache.root_dir", dir)?;
        }

        if let Ok(checkpoint) = env::var("MODEL_CHECKPOINT") {
            settings = settings.set_override("engine.model_checkpoint", checkpoint)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - Server port is not 0
    /// - At least one batch worker
    /// - Non-zero engine timeout and cache max age
    /// - Non-zero decode parameters and upload limits
    pub fn validate(&self) -> AppResult<()> {
        if self.server.port == 0 {
            return Err(invalid("Server port cannot be 0"));
        }

        if self.workers.max_concurrent_jobs == 0 {
            return Err(invalid("Max concurrent jobs must be greater than 0"));
        }

        if self.engine.timeout_secs == 0 {
            return Err(invalid("Engine timeout must be greater than 0"));
        }

        if self.engine.program.trim().is_empty() {
            return Err(invalid("Engine program cannot be empty"));
        }

        if self.cache.max_age_hours == 0 {
            return Err(invalid("Cache max age must be greater than 0"));
        }

        if self.cache.max_upload_mb == 0 {
            return Err(invalid("Max upload size must be greater than 0"));
        }

        if self.cache.max_batch_files == 0 || self.cache.max_batch_mb == 0 {
            return Err(invalid("Batch file count and size limits must be greater than 0"));
        }

        if self.cache.max_batch_mb < self.cache.max_upload_mb {
            return Err(invalid("Max batch size cannot be smaller than max upload size"));
        }

        let d = &self.decode;
        if d.chunk_size == 0
            || d.left_context_size == 0
            || d.right_context_size == 0
            || d.total_batch_duration == 0
        {
            return Err(invalid("Decode parameters must all be greater than 0"));
        }

        Ok(())
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Config(message.to_string())
}
