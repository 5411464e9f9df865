//! Fan one mutation out across many files and aggregate the outcome.
//!
//! A failing file never stops the others. Undo/redo replay reuses the same
//! aggregation so batch edits and replays report identically.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::audio;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Success,
    Partial,
    Error,
}

/// One file's failure: base filename and reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileError {
    pub file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub files_updated: usize,
    pub errors: Vec<FileError>,
    pub message: String,
    /// Full paths that succeeded, in processing order.
    #[serde(skip)]
    pub succeeded: Vec<String>,
}

impl BatchOutcome {
    pub fn is_error(&self) -> bool {
        self.status == BatchStatus::Error
    }

    /// True for `success` and `partial`.
    pub fn applied_any(&self) -> bool {
        self.files_updated > 0
    }
}

fn file_label(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Apply `mutate` to every path and collect per-file results.
///
/// Zero files is a success with nothing processed.
pub fn apply_to_files<S, F, E>(files: &[S], label: &str, mut mutate: F) -> BatchOutcome
where
    S: AsRef<str>,
    F: FnMut(&str) -> Result<(), E>,
    E: fmt::Display,
{
    let mut succeeded = Vec::with_capacity(files.len());
    let mut errors = Vec::new();

    for file in files {
        let path = file.as_ref();
        match mutate(path) {
            Ok(()) => succeeded.push(path.to_string()),
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!("{label}: {path} failed: {reason}");
                errors.push(FileError {
                    file: file_label(path),
                    reason,
                });
            }
        }
    }

    let files_updated = succeeded.len();
    let status = match (files_updated, errors.len()) {
        (_, 0) => BatchStatus::Success,
        (0, _) => BatchStatus::Error,
        _ => BatchStatus::Partial,
    };
    let message = match status {
        BatchStatus::Success => format!("{files_updated} files {label}"),
        BatchStatus::Partial => format!(
            "{files_updated} files {label}, {} errors",
            errors.len()
        ),
        BatchStatus::Error => format!("No files were {label}"),
    };

    BatchOutcome {
        status,
        files_updated,
        errors,
        message,
        succeeded,
    }
}

/// Run `mutate` over every audio file directly inside `folder`.
pub fn run_batch_mutation<F, E>(
    folder: &Path,
    show_hidden: bool,
    label: &str,
    mutate: F,
) -> Result<BatchOutcome, String>
where
    F: FnMut(&str) -> Result<(), E>,
    E: fmt::Display,
{
    let files = audio::list_audio_files(folder, show_hidden)?;
    let outcome = apply_to_files(&files, label, mutate);
    tracing::info!(
        "Batch {label} in {}: {:?}, {} updated, {} errors",
        folder.display(),
        outcome.status,
        outcome.files_updated,
        outcome.errors.len()
    );
    Ok(outcome)
}
