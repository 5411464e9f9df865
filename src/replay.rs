//! Undo/redo dispatcher.
//!
//! Every [`ActionKind`] maps to a [`Plan`] per direction; the match is
//! exhaustive so a new kind cannot be replayed by accident. File I/O runs
//! outside the history lock: the log only holds the action reserved between
//! `begin_replay` and `finish_replay`.

use std::path::Path;

use serde::Serialize;

use crate::action::{Action, ActionId, ActionKind, Value};
use crate::batch::{self, BatchOutcome};
use crate::history::{Direction, HistoryError, HistoryLog};
use crate::tags::TagCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Old,
    New,
}

/// What a replay does to each file of an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    /// Write the text value from `side`; an empty value deletes the field.
    /// `native` writes under the codec's native field name.
    WriteText { side: Side, native: bool },
    DeleteField,
    /// Re-apply the blob from `side`, or remove art when it is absent.
    WriteArt(Side),
}

fn plan(kind: ActionKind, direction: Direction) -> Plan {
    let side = match direction {
        Direction::Undo => Side::Old,
        Direction::Redo => Side::New,
    };
    match kind {
        ActionKind::MetadataChange | ActionKind::ClearField | ActionKind::BatchMetadata => {
            Plan::WriteText {
                side,
                native: false,
            }
        }
        ActionKind::DeleteField | ActionKind::BatchDeleteField => match direction {
            Direction::Undo => Plan::WriteText {
                side: Side::Old,
                native: false,
            },
            Direction::Redo => Plan::DeleteField,
        },
        ActionKind::CreateField | ActionKind::BatchCreateField => match direction {
            Direction::Undo => Plan::DeleteField,
            Direction::Redo => Plan::WriteText {
                side: Side::New,
                native: true,
            },
        },
        ActionKind::AlbumArtChange | ActionKind::AlbumArtDelete | ActionKind::BatchAlbumArt => {
            Plan::WriteArt(side)
        }
    }
}

/// Result of one undo or redo.
#[derive(Debug, Clone, Serialize)]
pub struct ReplayReport {
    pub action_id: ActionId,
    pub action_type: ActionKind,
    pub description: String,
    pub is_undone: bool,
    #[serde(flatten)]
    pub outcome: BatchOutcome,
}

fn label(direction: Direction) -> &'static str {
    match direction {
        Direction::Undo => "reverted",
        Direction::Redo => "reapplied",
    }
}

/// Undo or redo `id`. `NotFound`, `AlreadyUndone`, `NotUndone` and `Busy`
/// come back as errors; per-file failures are in the report.
pub fn replay(
    log: &HistoryLog,
    codec: &dyn TagCodec,
    id: &ActionId,
    direction: Direction,
) -> Result<ReplayReport, HistoryError> {
    let action = log.begin_replay(id, direction)?;
    let outcome = apply(log, codec, &action, direction);
    let applied = outcome.applied_any();

    let is_undone = match log.finish_replay(id, direction, applied) {
        Some(updated) => updated.is_undone,
        // Cleared or evicted mid-replay; report the state the files are in.
        None => {
            if applied {
                !action.is_undone
            } else {
                action.is_undone
            }
        }
    };

    tracing::info!(
        "{} {} {id}: {:?}, {} updated, {} errors",
        direction.as_str(),
        action.action_type,
        outcome.status,
        outcome.files_updated,
        outcome.errors.len()
    );

    Ok(ReplayReport {
        action_id: action.id.clone(),
        action_type: action.action_type,
        description: action.description.clone(),
        is_undone,
        outcome,
    })
}

fn side_value<'a>(action: &'a Action, side: Side, path: &str) -> Result<&'a Value, String> {
    let map = match side {
        Side::Old => &action.old_values,
        Side::New => &action.new_values,
    };
    map.get(path)
        .ok_or_else(|| format!("No recorded value for {path}"))
}

fn apply(
    log: &HistoryLog,
    codec: &dyn TagCodec,
    action: &Action,
    direction: Direction,
) -> BatchOutcome {
    let plan = plan(action.action_type, direction);
    let field = action.field.as_deref().unwrap_or_default();

    batch::apply_to_files(&action.files, label(direction), |file| {
        let path = Path::new(file);
        match plan {
            Plan::WriteText { side, native } => {
                let value = side_value(action, side, file)?
                    .as_text()
                    .ok_or_else(|| "Expected a text value".to_string())?;
                let name = if native {
                    let semantic = codec.semantic_field_name(path, field);
                    codec.native_field_name(path, &semantic)
                } else {
                    field.to_string()
                };
                codec
                    .write_field(path, &name, value)
                    .map_err(|e| e.to_string())
            }
            Plan::DeleteField => codec.delete_field(path, field).map_err(|e| e.to_string()),
            Plan::WriteArt(side) => match side_value(action, side, file)?.art_ref() {
                None => codec.remove_art(path).map_err(|e| e.to_string()),
                Some(art_ref) => {
                    let bytes = log
                        .load_art(art_ref)
                        .map_err(|e| e.to_string())?
                        .ok_or_else(|| format!("Album art {art_ref} is no longer available"))?;
                    codec.write_art(path, &bytes).map_err(|e| e.to_string())
                }
            },
        }
    })
}
