//! Tab-separated batch manifest shared with the inference engine.
//!
//! The gateway writes a single `wav` column, one audio path per row, in
//! submission order. The engine annotates the same file with an output
//! column (normally `decode`) without reordering rows. Row position is the
//! only link between an uploaded file and its transcription, so neither the
//! column name nor the order may change without changing the engine too.
//!
//! Fields follow the usual TSV quoting: a field containing a tab, newline or
//! double quote is wrapped in double quotes with inner quotes doubled.

use crate::cache::store::{CacheArea, CacheEntry, CacheStore};
use crate::error::{AppError, AppResult};
use std::path::Path;

/// Header of the input column.
pub const INPUT_COLUMN: &str = "wav";

/// Preferred header of the column the engine fills in.
pub const OUTPUT_COLUMN: &str = "decode";

/// One row read back from an annotated manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRow {
    pub input_path: String,
    /// `None` when the engine left no output for this row at all, either
    /// because the file has no output column or because the row is short.
    pub decode: Option<String>,
}

/// Serialize `entries` into a new file in the manifest area.
pub async fn write(store: &CacheStore, entries: &[CacheEntry]) -> AppResult<CacheEntry> {
    let text = encode(entries.iter().map(|entry| entry.path.as_path()));
    store
        .store_in(CacheArea::Manifest, text.as_bytes(), Some("tsv"))
        .await
}

/// Read an annotated manifest back.
pub async fn read(path: &Path) -> AppResult<Vec<ManifestRow>> {
    let text = tokio::fs::read_to_string(path).await.map_err(|e| {
        AppError::Parse(format!("cannot read manifest {}: {}", path.display(), e))
    })?;
    parse(&text)
}

/// The text form of a manifest listing `paths`.
pub fn encode<'a>(paths: impl IntoIterator<Item = &'a Path>) -> String {
    let mut text = String::from(INPUT_COLUMN);
    text.push('\n');
    for path in paths {
        text.push_str(&quote_field(&path.to_string_lossy()));
        text.push('\n');
    }
    text
}

/// Parse manifest text.
///
/// The input column is found by name. The output column is `decode`; a
/// header of exactly `wav` plus one other column also accepts that column
/// under its own name. Any other layout has no output column and every row
/// yields `decode: None`. Blank records are skipped. A row with more fields
/// than the header, or too few to reach the input column, is rejected; a row
/// that only lacks the output field yields `decode: None`.
pub fn parse(text: &str) -> AppResult<Vec<ManifestRow>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = split_records(text)?.into_iter();

    let header = records
        .next()
        .ok_or_else(|| AppError::Parse("manifest is empty, missing header".to_string()))?
        .fields;

    let input_idx = header
        .iter()
        .position(|name| name.trim() == INPUT_COLUMN)
        .ok_or_else(|| {
            AppError::Parse(format!(
                "header has no `{}` column: {:?}",
                INPUT_COLUMN, header
            ))
        })?;
    let output_idx = header
        .iter()
        .position(|name| name.trim() == OUTPUT_COLUMN)
        .or_else(|| (header.len() == 2 && input_idx == 0).then_some(1));

    let mut rows = Vec::new();
    for Record { line_no, mut fields } in records {
        if fields.len() > header.len() || fields.len() <= input_idx {
            return Err(AppError::Parse(format!(
                "line {} has {} fields, header has {}",
                line_no,
                fields.len(),
                header.len()
            )));
        }

        let decode = output_idx.and_then(|idx| fields.get(idx).cloned());
        let input_path = std::mem::take(&mut fields[input_idx]);
        if input_path.is_empty() {
            return Err(AppError::Parse(format!(
                "line {} has an empty `{}` field",
                line_no, INPUT_COLUMN
            )));
        }

        rows.push(ManifestRow { input_path, decode });
    }

    Ok(rows)
}

fn quote_field(value: &str) -> String {
    if value.contains(['\t', '\n', '\r', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One logical row and the physical line it starts on.
struct Record {
    line_no: usize,
    fields: Vec<String>,
}

/// Split the whole text into records on tabs and newlines.
///
/// Quoted fields may span lines, so the quote state carries across newlines.
/// A `\r` directly before an unquoted newline is dropped.
fn split_records(text: &str) -> AppResult<Vec<Record>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = text.chars().peekable();
    let mut line_no = 1;
    let mut record_start = 1;
    let mut in_quotes = false;
    let mut at_field_start = true;
    let mut saw_quote = false;

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' if at_field_start => {
                in_quotes = true;
                saw_quote = true;
                at_field_start = false;
            }
            '\n' if in_quotes => {
                field.push('\n');
                line_no += 1;
            }
            '\r' if !in_quotes && chars.peek() == Some(&'\n') => {}
            '\t' if !in_quotes => {
                fields.push(std::mem::take(&mut field));
                at_field_start = true;
            }
            '\n' => {
                fields.push(std::mem::take(&mut field));
                push_record(&mut records, record_start, std::mem::take(&mut fields), saw_quote);
                line_no += 1;
                record_start = line_no;
                at_field_start = true;
                saw_quote = false;
            }
            other => {
                field.push(other);
                at_field_start = false;
            }
        }
    }

    if in_quotes {
        return Err(AppError::Parse(format!(
            "line {} has an unterminated quote",
            record_start
        )));
    }
    if saw_quote || !fields.is_empty() || !field.is_empty() {
        fields.push(field);
        push_record(&mut records, record_start, fields, saw_quote);
    }
    Ok(records)
}

fn push_record(records: &mut Vec<Record>, line_no: usize, fields: Vec<String>, quoted: bool) {
    let blank = !quoted && fields.iter().all(|field| field.trim().is_empty());
    if !blank {
        records.push(Record { line_no, fields });
    }
}
