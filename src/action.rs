//! Action model: one recorded, undoable metadata mutation.
//!
//! Route handlers construct actions through the `Action::*` constructors once
//! they know the old and new values; the history log only validates shape.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::art_store::ArtRef;

/// Opaque action identifier (UUID v4, canonical string form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for ActionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One tag per distinct undo/redo behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MetadataChange,
    ClearField,
    BatchMetadata,
    AlbumArtChange,
    AlbumArtDelete,
    BatchAlbumArt,
    DeleteField,
    BatchDeleteField,
    CreateField,
    BatchCreateField,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MetadataChange => "metadata_change",
            Self::ClearField => "clear_field",
            Self::BatchMetadata => "batch_metadata",
            Self::AlbumArtChange => "album_art_change",
            Self::AlbumArtDelete => "album_art_delete",
            Self::BatchAlbumArt => "batch_album_art",
            Self::DeleteField => "delete_field",
            Self::BatchDeleteField => "batch_delete_field",
            Self::CreateField => "create_field",
            Self::BatchCreateField => "batch_create_field",
        }
    }

    pub fn is_art(self) -> bool {
        matches!(
            self,
            Self::AlbumArtChange | Self::AlbumArtDelete | Self::BatchAlbumArt
        )
    }

    pub fn is_batch(self) -> bool {
        matches!(
            self,
            Self::BatchMetadata
                | Self::BatchAlbumArt
                | Self::BatchDeleteField
                | Self::BatchCreateField
        )
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A per-file value inside `old_values` / `new_values`.
///
/// Text values use `""` for "field did not exist". Art values hold a blob
/// reference, or `None` for "no art".
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Text(String),
    Art { art_ref: Option<ArtRef> },
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn art(art_ref: Option<ArtRef>) -> Self {
        Self::Art { art_ref }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Art { .. } => None,
        }
    }

    pub fn art_ref(&self) -> Option<&ArtRef> {
        match self {
            Self::Art { art_ref } => art_ref.as_ref(),
            Self::Text(_) => None,
        }
    }

    fn is_art(&self) -> bool {
        matches!(self, Self::Art { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub id: ActionId,
    pub action_type: ActionKind,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub old_values: HashMap<String, Value>,
    pub new_values: HashMap<String, Value>,
    pub is_undone: bool,
}

/// Compact listing entry.
#[derive(Debug, Clone, Serialize)]
pub struct ActionSummary {
    pub id: ActionId,
    pub action_type: ActionKind,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub file_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub is_undone: bool,
}

/// Shape violation found by [`Action::validate`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ShapeError(String);

const SUMMARY_TEXT_LIMIT: usize = 100;

fn display_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

fn truncate_for_summary(text: &str) -> String {
    if text.chars().count() <= SUMMARY_TEXT_LIMIT {
        return text.to_string();
    }
    let head: String = text.chars().take(SUMMARY_TEXT_LIMIT).collect();
    format!("{head}...")
}

impl Action {
    fn build(
        action_type: ActionKind,
        description: String,
        files: Vec<String>,
        field: Option<String>,
        old_values: HashMap<String, Value>,
        new_values: HashMap<String, Value>,
    ) -> Self {
        Self {
            id: ActionId::new(),
            action_type,
            timestamp: Utc::now(),
            description,
            files,
            field,
            old_values,
            new_values,
            is_undone: false,
        }
    }

    fn single_text(
        action_type: ActionKind,
        description: String,
        path: &str,
        field: &str,
        old: &str,
        new: &str,
    ) -> Self {
        Self::build(
            action_type,
            description,
            vec![path.to_string()],
            Some(field.to_string()),
            HashMap::from([(path.to_string(), Value::text(old))]),
            HashMap::from([(path.to_string(), Value::text(new))]),
        )
    }

    /// Single-file field change. Records `ClearField` when the new value is
    /// empty and the old one was not.
    pub fn metadata_change(path: &str, field: &str, old: &str, new: &str) -> Self {
        if new.trim().is_empty() && !old.trim().is_empty() {
            let name = display_name(path);
            Self::single_text(
                ActionKind::ClearField,
                format!("Cleared {field} in \"{name}\""),
                path,
                field,
                old,
                new,
            )
        } else {
            Self::field_overwrite(path, field, old, new)
        }
    }

    /// Always a `MetadataChange`, even when `new` is blank. Used when a field
    /// is created over an existing one.
    pub fn field_overwrite(path: &str, field: &str, old: &str, new: &str) -> Self {
        let name = display_name(path);
        Self::single_text(
            ActionKind::MetadataChange,
            format!("Changed {field} in \"{name}\""),
            path,
            field,
            old,
            new,
        )
    }

    /// Folder-wide field change. `changes` is `(path, old, new)` in iteration order.
    pub fn batch_metadata(field: &str, changes: &[(String, String, String)]) -> Self {
        let files: Vec<String> = changes.iter().map(|(p, _, _)| p.clone()).collect();
        let old_values = changes
            .iter()
            .map(|(p, old, _)| (p.clone(), Value::text(old.as_str())))
            .collect();
        let new_values = changes
            .iter()
            .map(|(p, _, new)| (p.clone(), Value::text(new.as_str())))
            .collect();
        Self::build(
            ActionKind::BatchMetadata,
            format!("Changed {field} in {} files", files.len()),
            files,
            Some(field.to_string()),
            old_values,
            new_values,
        )
    }

    /// Single-file art change. `new == None` records an `AlbumArtDelete`.
    pub fn album_art(path: &str, old: Option<ArtRef>, new: Option<ArtRef>) -> Self {
        let name = display_name(path);
        let (action_type, description) = if new.is_none() {
            (
                ActionKind::AlbumArtDelete,
                format!("Deleted album art from \"{name}\""),
            )
        } else {
            (
                ActionKind::AlbumArtChange,
                format!("Changed album art in \"{name}\""),
            )
        };
        Self::build(
            action_type,
            description,
            vec![path.to_string()],
            None,
            HashMap::from([(path.to_string(), Value::art(old))]),
            HashMap::from([(path.to_string(), Value::art(new))]),
        )
    }

    /// Folder-wide art change. Every file receives the same `new` blob.
    pub fn batch_album_art(changes: &[(String, Option<ArtRef>)], new: &ArtRef) -> Self {
        let files: Vec<String> = changes.iter().map(|(p, _)| p.clone()).collect();
        let old_values = changes
            .iter()
            .map(|(p, old)| (p.clone(), Value::art(old.clone())))
            .collect();
        let new_values = files
            .iter()
            .map(|p| (p.clone(), Value::art(Some(new.clone()))))
            .collect();
        Self::build(
            ActionKind::BatchAlbumArt,
            format!("Changed album art in {} files", files.len()),
            files,
            None,
            old_values,
            new_values,
        )
    }

    pub fn delete_field(path: &str, field: &str, old: &str) -> Self {
        let name = display_name(path);
        Self::single_text(
            ActionKind::DeleteField,
            format!("Deleted field {field} from \"{name}\""),
            path,
            field,
            old,
            "",
        )
    }

    /// `changes` is `(path, old)`.
    pub fn batch_delete_field(field: &str, changes: &[(String, String)]) -> Self {
        let files: Vec<String> = changes.iter().map(|(p, _)| p.clone()).collect();
        let old_values = changes
            .iter()
            .map(|(p, old)| (p.clone(), Value::text(old.as_str())))
            .collect();
        let new_values = files.iter().map(|p| (p.clone(), Value::text(""))).collect();
        Self::build(
            ActionKind::BatchDeleteField,
            format!("Deleted field {field} from {} files", files.len()),
            files,
            Some(field.to_string()),
            old_values,
            new_values,
        )
    }

    pub fn create_field(path: &str, field: &str, value: &str) -> Self {
        let name = display_name(path);
        Self::single_text(
            ActionKind::CreateField,
            format!("Created field {field} in \"{name}\""),
            path,
            field,
            "",
            value,
        )
    }

    /// `changes` is `(path, new)`.
    pub fn batch_create_field(field: &str, changes: &[(String, String)]) -> Self {
        let files: Vec<String> = changes.iter().map(|(p, _)| p.clone()).collect();
        let old_values = files.iter().map(|p| (p.clone(), Value::text(""))).collect();
        let new_values = changes
            .iter()
            .map(|(p, new)| (p.clone(), Value::text(new.as_str())))
            .collect();
        Self::build(
            ActionKind::BatchCreateField,
            format!("Created field {field} in {} files", files.len()),
            files,
            Some(field.to_string()),
            old_values,
            new_values,
        )
    }

    /// Check the structural invariants every recorded action must satisfy:
    ///
    /// - `files` is non-empty, without duplicates; single-file kinds hold exactly one
    /// - `old_values` and `new_values` are keyed by exactly the paths in `files`
    /// - art kinds carry art values and no field; text kinds carry text values and a field
    pub fn validate(&self) -> Result<(), ShapeError> {
        if self.files.is_empty() {
            return Err(ShapeError(format!("{}: no files", self.action_type)));
        }
        if !self.action_type.is_batch() && self.files.len() != 1 {
            return Err(ShapeError(format!(
                "{}: expected exactly one file, got {}",
                self.action_type,
                self.files.len()
            )));
        }

        let unique: HashSet<&str> = self.files.iter().map(String::as_str).collect();
        if unique.len() != self.files.len() {
            return Err(ShapeError(format!("{}: duplicate file paths", self.action_type)));
        }

        for (label, map) in [("old_values", &self.old_values), ("new_values", &self.new_values)] {
            if map.len() != unique.len() || !map.keys().all(|k| unique.contains(k.as_str())) {
                return Err(ShapeError(format!(
                    "{}: {label} keys do not match files",
                    self.action_type
                )));
            }
        }

        let art = self.action_type.is_art();
        let values_match = self
            .old_values
            .values()
            .chain(self.new_values.values())
            .all(|v| v.is_art() == art);
        if !values_match {
            return Err(ShapeError(format!(
                "{}: value kind does not match action type",
                self.action_type
            )));
        }

        match (art, self.field.as_deref()) {
            (true, Some(_)) => Err(ShapeError(format!(
                "{}: art actions carry no field",
                self.action_type
            ))),
            (false, None) => Err(ShapeError(format!("{}: missing field", self.action_type))),
            (false, Some(f)) if f.trim().is_empty() => {
                Err(ShapeError(format!("{}: empty field name", self.action_type)))
            }
            _ => Ok(()),
        }
    }

    /// Every blob this action references, without duplicates.
    pub fn art_refs(&self) -> HashSet<ArtRef> {
        self.old_values
            .values()
            .chain(self.new_values.values())
            .filter_map(Value::art_ref)
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> ActionSummary {
        ActionSummary {
            id: self.id.clone(),
            action_type: self.action_type,
            description: truncate_for_summary(&self.description),
            timestamp: self.timestamp,
            file_count: self.files.len(),
            field: self.field.clone(),
            is_undone: self.is_undone,
        }
    }

    /// Replace every occurrence of a path in `files` and both value maps.
    /// `map_path` returns `Some(new)` for paths that should change.
    ///
    /// A path that is not moved but equals a move target refers to a file the
    /// move replaced; its entry is dropped so `files` stays duplicate-free.
    /// Returns true when anything changed.
    pub(crate) fn rewrite_paths(&mut self, map_path: impl Fn(&str) -> Option<String>) -> bool {
        let targets: HashSet<String> = self.files.iter().filter_map(|f| map_path(f)).collect();
        if targets.is_empty() {
            return false;
        }
        let replaced: HashSet<String> = self
            .files
            .iter()
            .filter(|f| targets.contains(f.as_str()) && map_path(f).is_none())
            .cloned()
            .collect();
        for path in &replaced {
            tracing::warn!(
                "Dropping {path} from action {}: another file was moved onto it",
                self.id
            );
        }

        let files = std::mem::take(&mut self.files);
        self.files = files
            .into_iter()
            .filter(|f| !replaced.contains(f))
            .map(|f| map_path(&f).unwrap_or(f))
            .collect();
        for map in [&mut self.old_values, &mut self.new_values] {
            let rekeyed: HashMap<String, Value> = map
                .drain()
                .filter(|(k, _)| !replaced.contains(k))
                .map(|(k, v)| (map_path(&k).unwrap_or(k), v))
                .collect();
            *map = rekeyed;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_change_picks_clear_field_for_emptied_value() {
        let a = Action::metadata_change("/music/a.mp3", "genre", "House", "");
        assert_eq!(a.action_type, ActionKind::ClearField);
        assert_eq!(a.description, "Cleared genre in \"a.mp3\"");

        let b = Action::metadata_change("/music/a.mp3", "genre", "", "Techno");
        assert_eq!(b.action_type, ActionKind::MetadataChange);
        assert!(b.validate().is_ok());
    }

    #[test]
    fn field_overwrite_with_blank_is_still_a_change() {
        let a = Action::field_overwrite("/music/a.mp3", "mood", "happy", " ");
        assert_eq!(a.action_type, ActionKind::MetadataChange);
        assert_eq!(a.description, "Changed mood in \"a.mp3\"");
    }

    #[test]
    fn constructors_produce_valid_shapes() {
        let art = ArtRef::from("blob-1");
        let actions = vec![
            Action::metadata_change("/m/a.mp3", "title", "Alice", "Bob"),
            Action::batch_metadata(
                "album",
                &[
                    ("/m/a.mp3".into(), "X".into(), "Y".into()),
                    ("/m/b.mp3".into(), "".into(), "Y".into()),
                ],
            ),
            Action::album_art("/m/a.mp3", None, Some(art.clone())),
            Action::album_art("/m/a.mp3", Some(art.clone()), None),
            Action::batch_album_art(&[("/m/a.mp3".into(), None)], &art),
            Action::delete_field("/m/a.mp3", "mood", "happy"),
            Action::batch_delete_field("mood", &[("/m/a.mp3".into(), "happy".into())]),
            Action::create_field("/m/a.mp3", "mood", "calm"),
            Action::batch_create_field("mood", &[("/m/a.mp3".into(), "calm".into())]),
        ];
        for action in &actions {
            assert!(action.validate().is_ok(), "{} should be valid", action.action_type);
        }
        assert_eq!(actions[3].action_type, ActionKind::AlbumArtDelete);
    }

    #[test]
    fn validate_rejects_empty_files() {
        let action = Action::batch_metadata("title", &[]);
        assert!(action.validate().is_err());
    }

    #[test]
    fn validate_rejects_stray_value_keys() {
        let mut action = Action::metadata_change("/m/a.mp3", "title", "A", "B");
        action
            .old_values
            .insert("/m/other.mp3".to_string(), Value::text("x"));
        assert!(action.validate().is_err());
    }

    #[test]
    fn validate_rejects_text_value_on_art_action() {
        let mut action = Action::album_art("/m/a.mp3", None, Some(ArtRef::from("b")));
        action
            .new_values
            .insert("/m/a.mp3".to_string(), Value::text("oops"));
        assert!(action.validate().is_err());
    }

    #[test]
    fn validate_rejects_multi_file_single_kind() {
        let mut action = Action::metadata_change("/m/a.mp3", "title", "A", "B");
        action.files.push("/m/b.mp3".to_string());
        action.old_values.insert("/m/b.mp3".into(), Value::text("A"));
        action.new_values.insert("/m/b.mp3".into(), Value::text("B"));
        assert!(action.validate().is_err());
    }

    #[test]
    fn art_refs_are_deduplicated() {
        let art = ArtRef::from("shared");
        let action = Action::batch_album_art(
            &[
                ("/m/a.mp3".into(), Some(ArtRef::from("old-a"))),
                ("/m/b.mp3".into(), None),
            ],
            &art,
        );
        let refs = action.art_refs();
        assert_eq!(refs.len(), 2);
        assert!(refs.contains(&art));
    }

    #[test]
    fn rewrite_paths_updates_files_and_keys() {
        let mut action = Action::metadata_change("/m/old.mp3", "title", "A", "B");
        let changed = action.rewrite_paths(|p| (p == "/m/old.mp3").then(|| "/m/new.mp3".to_string()));
        assert!(changed);
        assert_eq!(action.files, vec!["/m/new.mp3"]);
        assert!(action.old_values.contains_key("/m/new.mp3"));
        assert!(action.new_values.contains_key("/m/new.mp3"));
        assert!(action.validate().is_ok());
    }

    #[test]
    fn rewrite_onto_held_path_drops_replaced_entry() {
        let mut action = Action::batch_metadata(
            "track",
            &[
                ("/m/A/a.mp3".into(), "1".into(), "01".into()),
                ("/m/A/b.mp3".into(), "2".into(), "02".into()),
            ],
        );
        let changed =
            action.rewrite_paths(|p| (p == "/m/A/a.mp3").then(|| "/m/A/b.mp3".to_string()));
        assert!(changed);
        assert_eq!(action.files, vec!["/m/A/b.mp3"]);
        assert_eq!(action.old_values["/m/A/b.mp3"], Value::text("1"));
        assert_eq!(action.new_values["/m/A/b.mp3"], Value::text("01"));
        assert!(action.validate().is_ok());
    }

    #[test]
    fn rewrite_without_match_is_noop() {
        let mut action = Action::metadata_change("/m/a.mp3", "title", "A", "B");
        assert!(!action.rewrite_paths(|p| (p == "/m/x.mp3").then(|| "/m/y.mp3".to_string())));
        assert_eq!(action.files, vec!["/m/a.mp3"]);
    }

    #[test]
    fn summary_truncates_long_descriptions() {
        let long_field = "x".repeat(150);
        let action = Action::metadata_change("/m/a.mp3", &long_field, "", "v");
        let summary = action.summary();
        assert!(summary.description.ends_with("..."));
        assert_eq!(summary.file_count, 1);
    }
}
