//! In-process engine double for tests.

use crate::cache::manifest;
use crate::config::DecodeParams;
use crate::transcription::engine::InferenceEngine;
use crate::transcription::result::Transcription;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Behaviour {
    /// Write `decoded <file name>` into a `decode` column
    Annotate,
    /// Return success without touching the manifest
    LeaveUntouched,
    /// Annotate but write the rows back in reverse order
    Reorder,
    /// Annotate, but give the second row segments that end before they start
    InvalidSecondRow,
    /// Raise like a crashed engine
    Fail,
    /// Never return
    Hang,
    /// Panic inside the engine call
    Panic,
}

#[derive(Debug)]
pub struct ScriptedEngine {
    behaviour: Behaviour,
    /// When set, every call waits for a permit before doing anything
    gate: Option<Arc<Semaphore>>,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<PathBuf>>,
}

impl ScriptedEngine {
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            behaviour,
            gate: None,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Engine whose calls block until the returned semaphore gets permits.
    pub fn gated(behaviour: Behaviour) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let mut engine = Self::new(behaviour);
        engine.gate = Some(gate.clone());
        (engine, gate)
    }

    async fn enter(&self, path: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(path.to_path_buf());
        assert!(path.exists(), "engine called with missing file {}", path.display());

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }
        match self.behaviour {
            Behaviour::Fail => Err(anyhow!("CUDA out of memory")),
            Behaviour::Hang => std::future::pending().await,
            Behaviour::Panic => panic!("engine panicked"),
            _ => Ok(()),
        }
    }
}

fn decoded_text(input_path: &str) -> String {
    let name = Path::new(input_path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("decoded {}", name)
}

#[async_trait]
impl InferenceEngine for ScriptedEngine {
    fn describe(&self) -> String {
        format!("scripted ({:?})", self.behaviour)
    }

    async fn transcribe_file(
        &self,
        audio: &Path,
        _params: &DecodeParams,
    ) -> Result<Transcription> {
        self.enter(audio).await?;
        Ok(Transcription::Text(decoded_text(&audio.to_string_lossy())))
    }

    async fn decode_manifest(&self, manifest_path: &Path, _params: &DecodeParams) -> Result<()> {
        self.enter(manifest_path).await?;
        if self.behaviour == Behaviour::LeaveUntouched {
            return Ok(());
        }

        let mut rows = manifest::read(manifest_path).await?;
        if self.behaviour == Behaviour::Reorder {
            rows.reverse();
        }
        let mut text = String::from("wav\tdecode\n");
        for (idx, row) in rows.iter().enumerate() {
            let decode = if self.behaviour == Behaviour::InvalidSecondRow && idx == 1 {
                r#"[{"start":1.0,"end":0.999,"decode":"x"}]"#.to_string()
            } else {
                decoded_text(&row.input_path)
            };
            text.push_str(&format!("{}\t{}\n", row.input_path, decode));
        }
        tokio::fs::write(manifest_path, text).await?;
        Ok(())
    }
}
