//! Transcription payloads returned to clients.

use serde::{Deserialize, Serialize};

/// A timed piece of decoded speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Seconds from the start of the audio
    pub start: f64,
    pub end: f64,
    pub decode: String,
}

impl Segment {
    fn check(&self) -> Result<(), String> {
        if !self.start.is_finite() || !self.end.is_finite() {
            return Err(format!("segment bounds must be finite: {:?}", self));
        }
        if self.start < 0.0 {
            return Err(format!("segment starts before 0: {}", self.start));
        }
        if self.end < self.start {
            return Err(format!(
                "segment ends before it starts: {} < {}",
                self.end, self.start
            ));
        }
        Ok(())
    }
}

/// What the engine produced for one file: either flat text or segments.
///
/// Serialized untagged, so clients see a JSON string or a JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transcription {
    Text(String),
    Segments(Vec<Segment>),
}

impl Transcription {
    /// Interpret raw engine output.
    ///
    /// JSON strings and segment arrays are decoded as such; anything that
    /// doesn't parse as JSON is taken as plain text. Segment arrays with
    /// impossible bounds are rejected.
    pub fn from_engine_output(raw: &str) -> Result<Self, String> {
        let trimmed = raw.trim();
        if trimmed.starts_with('[') || trimmed.starts_with('"') {
            if let Ok(parsed) = serde_json::from_str::<Transcription>(trimmed) {
                if let Transcription::Segments(segments) = &parsed {
                    for segment in segments {
                        segment.check()?;
                    }
                }
                return Ok(parsed);
            }
        }
        Ok(Transcription::Text(trimmed.to_string()))
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Transcription::Text(text) => text.is_empty(),
            Transcription::Segments(segments) => segments.is_empty(),
        }
    }
}

/// Whether the engine left output for a batch row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowOutcome {
    /// The manifest had an output field for this row (possibly empty)
    Decoded,
    /// No output column, or the row was too short to carry one
    Missing,
    /// The engine wrote something that isn't a usable transcription
    Invalid,
}

/// One entry of a completed task's `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileResult {
    /// Filename as uploaded by the client
    pub filename: String,
    pub transcription: Transcription,
    pub outcome: RowOutcome,
    /// Why the row's output was rejected, for `Invalid` rows
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
