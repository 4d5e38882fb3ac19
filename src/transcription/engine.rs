//! # Inference Engine Seam
//!
//! The speech model runs outside this process. [`InferenceEngine`] is the
//! boundary: the gateway hands it a file or a manifest plus [`DecodeParams`]
//! and gets text back (single file) or an annotated manifest (batch).
//!
//! [`CommandEngine`] is the production adapter. It runs the decoder script
//! as a subprocess with the argument layout the decoder's own launcher uses:
//!
//! ```text
//! <program> <script> --model_checkpoint <dir> --total_batch_duration <n>
//!     --chunk_size <n> --left_context_size <n> --right_context_size <n>
//!     [--device <dev>] (--long_form_audio <file> | --audio_list <tsv>)
//!     <extra_args...>
//! ```

use crate::config::{DecodeParams, EngineConfig};
use crate::error::{AppError, AppResult};
use crate::transcription::result::Transcription;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Lines of stderr kept in the error message when the decoder fails.
const STDERR_TAIL_LINES: usize = 20;

/// An external speech-to-text engine.
///
/// Both calls may block for a long time. Implementations must be cancel-safe
/// in the sense that dropping the returned future stops the work; the gateway
/// drops it when the engine timeout expires.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Short human-readable description for health output.
    fn describe(&self) -> String;

    /// Decode one audio file and return its transcription.
    async fn transcribe_file(&self, audio: &Path, params: &DecodeParams) -> Result<Transcription>;

    /// Decode every row of `manifest`, writing output back into it without
    /// reordering rows. Per-row failures should surface as empty output, not
    /// as an error.
    async fn decode_manifest(&self, manifest: &Path, params: &DecodeParams) -> Result<()>;
}

/// Await an engine call under a deadline, mapping every failure to
/// `AppError::Engine`.
pub async fn with_deadline<T, F>(timeout: Duration, call: F) -> AppResult<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(AppError::Engine(format!("{:#}", e))),
        Err(_) => Err(AppError::Engine(format!(
            "inference timed out after {}s",
            timeout.as_secs()
        ))),
    }
}

/// What the decoder should work on.
#[derive(Debug, Clone, Copy)]
pub enum DecodeTarget<'a> {
    LongFormAudio(&'a Path),
    AudioList(&'a Path),
}

/// Runs the decoder as a child process per request.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    config: EngineConfig,
}

impl CommandEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Arguments passed after the program name.
    pub fn command_args(&self, params: &DecodeParams, target: DecodeTarget<'_>) -> Vec<String> {
        let mut args = Vec::new();
        if !self.config.script.is_empty() {
            args.push(self.config.script.clone());
        }
        args.extend([
            "--model_checkpoint".to_string(),
            self.config.model_checkpoint.to_string_lossy().into_owned(),
            "--total_batch_duration".to_string(),
            params.total_batch_duration.to_string(),
            "--chunk_size".to_string(),
            params.chunk_size.to_string(),
            "--left_context_size".to_string(),
            params.left_context_size.to_string(),
            "--right_context_size".to_string(),
            params.right_context_size.to_string(),
        ]);
        if let Some(device) = &self.config.device {
            args.push("--device".to_string());
            args.push(device.clone());
        }
        match target {
            DecodeTarget::LongFormAudio(path) => {
                args.push("--long_form_audio".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
            DecodeTarget::AudioList(path) => {
                args.push("--audio_list".to_string());
                args.push(path.to_string_lossy().into_owned());
            }
        }
        args.extend(self.config.extra_args.iter().cloned());
        args
    }

    /// Run the decoder to completion and return its stdout.
    async fn run(&self, params: &DecodeParams, target: DecodeTarget<'_>) -> Result<String> {
        let args = self.command_args(params, target);
        tracing::info!("Executing command: {} {}", self.config.program, args.join(" "));
        let start_time = Instant::now();

        let output = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Dropping the future on timeout must not leave the decoder running
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to start decoder `{}`", self.config.program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        for line in stderr.lines().filter(|line| !line.trim().is_empty()) {
            tracing::debug!(target: "asr_gateway::decoder", "{}", line);
        }

        if !output.status.success() {
            let lines: Vec<&str> = stderr.lines().collect();
            let tail = lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..].join("\n");
            return Err(anyhow!("decoder exited with {}: {}", output.status, tail.trim()));
        }

        tracing::info!(
            duration_ms = start_time.elapsed().as_millis() as u64,
            "Decoder finished"
        );
        Ok(stdout)
    }
}

#[async_trait]
impl InferenceEngine for CommandEngine {
    fn describe(&self) -> String {
        format!(
            "{} {} ({})",
            self.config.program,
            self.config.script,
            self.config.model_checkpoint.display()
        )
    }

    async fn transcribe_file(&self, audio: &Path, params: &DecodeParams) -> Result<Transcription> {
        let stdout = self.run(params, DecodeTarget::LongFormAudio(audio)).await?;
        Transcription::from_engine_output(&stdout)
            .map_err(|e| anyhow!("decoder produced invalid output: {}", e))
    }

    async fn decode_manifest(&self, manifest: &Path, params: &DecodeParams) -> Result<()> {
        let stdout = self.run(params, DecodeTarget::AudioList(manifest)).await?;
        for line in stdout.lines().filter(|line| !line.trim().is_empty()) {
            tracing::debug!(target: "asr_gateway::decoder", "{}", line);
        }
        Ok(())
    }
}
