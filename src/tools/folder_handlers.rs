use std::collections::HashMap;
use std::path::Path;

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;

use super::*;
use crate::action::{Action, ActionId};
use crate::art_store::ArtRef;
use crate::batch;

/// The aggregate fields every batch tool returns, plus `extra`.
fn batch_payload(outcome: &BatchOutcome, extra: serde_json::Value) -> serde_json::Value {
    let mut payload = serde_json::json!({
        "status": outcome.status,
        "files_updated": outcome.files_updated,
        "errors": outcome.errors,
        "message": outcome.message,
    });
    if let (Some(map), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
        map.extend(extra);
    }
    payload
}

fn require_field(field: &str) -> Result<String, McpError> {
    let field = field.trim();
    if field.is_empty() {
        return Err(invalid("Field name must not be empty".to_string()));
    }
    Ok(field.to_string())
}

/// Record a folder-wide field write: files where the field existed become one
/// `BatchMetadata`, the rest one `BatchCreateField`. Only files that
/// succeeded and actually changed are recorded.
fn record_field_batch(
    engine: &Engine,
    field: &str,
    outcome: &BatchOutcome,
    old_values: &HashMap<String, String>,
    new: &str,
) -> Result<Vec<ActionId>, McpError> {
    if outcome.is_error() {
        return Ok(Vec::new());
    }

    let mut updated = Vec::new();
    let mut created = Vec::new();
    for file in &outcome.succeeded {
        let old = old_values.get(file).cloned().unwrap_or_default();
        if normalize_value(&old) == normalize_value(new) {
            continue;
        }
        if old.is_empty() {
            created.push((file.clone(), new.to_string()));
        } else {
            updated.push((file.clone(), old, new.to_string()));
        }
    }

    let mut ids = Vec::new();
    if !updated.is_empty() {
        ids.push(
            engine
                .record_action(Action::batch_metadata(field, &updated))
                .map_err(history_error)?,
        );
    }
    if !created.is_empty() {
        ids.push(
            engine
                .record_action(Action::batch_create_field(field, &created))
                .map_err(history_error)?,
        );
    }
    Ok(ids)
}

pub(super) async fn handle_apply_field_to_folder(
    server: &MetaRemoteServer,
    params: FolderFieldValueParams,
) -> Result<CallToolResult, McpError> {
    let folder = server.resolve_dir(&params.folder)?;
    let field = require_field(&params.field)?;
    let value = normalize_value(&params.value).to_string();
    let engine = server.engine().clone();
    let dir = folder.clone();

    let (outcome, name, ids) = blocking(move || {
        let codec = engine.codec();
        let name = codec.semantic_field_name(&dir, &field);
        let mut old_values: HashMap<String, String> = HashMap::new();
        let outcome = engine
            .run_batch_mutation(&dir, "updated", |file| {
                let path = Path::new(file);
                let old = codec.read_field(path, &field)?.unwrap_or_default();
                codec.write_field(path, &field, &value)?;
                old_values.insert(file.to_string(), old);
                Ok::<_, TagError>(())
            })
            .map_err(invalid)?;
        let ids = record_field_batch(&engine, &name, &outcome, &old_values, &value)?;
        Ok((outcome, name, ids))
    })
    .await?;

    let payload = batch_payload(
        &outcome,
        serde_json::json!({
            "folder": server.relative(&folder),
            "field": name,
            "action_ids": ids,
        }),
    );
    outcome_result(&outcome, &payload)
}

pub(super) async fn handle_create_field_in_folder(
    server: &MetaRemoteServer,
    params: CreateFieldParams,
) -> Result<CallToolResult, McpError> {
    validate_field_name(&params.field).map_err(invalid)?;
    let file = server.resolve_audio_file(&params.path)?;
    let folder = file
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| invalid(format!("No parent folder for {}", params.path)))?;
    let field = params.field.trim().to_string();
    let value = stored_field_value(params.value.as_deref().unwrap_or_default());
    let engine = server.engine().clone();
    let dir = folder.clone();

    let (outcome, semantic, ids) = blocking(move || {
        let codec = engine.codec();
        let semantic = codec.semantic_field_name(&file, &field);
        let mut existing: HashMap<String, (String, String)> = HashMap::new();
        let outcome = engine
            .run_batch_mutation(&dir, "updated", |f| {
                let path = Path::new(f);
                let native = codec.native_field_name(path, &semantic);
                let old = codec.read_field(path, &native)?.unwrap_or_default();
                codec.write_field(path, &native, &value)?;
                existing.insert(f.to_string(), (native, old));
                Ok::<_, TagError>(())
            })
            .map_err(invalid)?;

        let mut ids = Vec::new();
        if !outcome.is_error() {
            let mut created = Vec::new();
            for f in &outcome.succeeded {
                match existing.get(f) {
                    Some((_, old)) if *old == value => {}
                    Some((native, old)) if !old.is_empty() => {
                        let action = Action::field_overwrite(f, native, old, &value);
                        ids.push(engine.record_action(action).map_err(history_error)?);
                    }
                    _ => created.push((f.clone(), value.clone())),
                }
            }
            if !created.is_empty() {
                let action = Action::batch_create_field(&semantic, &created);
                ids.push(engine.record_action(action).map_err(history_error)?);
            }
        }
        Ok((outcome, semantic, ids))
    })
    .await?;

    let payload = batch_payload(
        &outcome,
        serde_json::json!({
            "folder": server.relative(&folder),
            "field": semantic,
            "action_ids": ids,
        }),
    );
    outcome_result(&outcome, &payload)
}

pub(super) async fn handle_delete_field_from_folder(
    server: &MetaRemoteServer,
    params: FolderFieldParams,
) -> Result<CallToolResult, McpError> {
    let folder = server.resolve_dir(&params.folder)?;
    let field = require_field(&params.field)?;
    let engine = server.engine().clone();
    let dir = folder.clone();

    let (outcome, skipped, name, id) = blocking(move || {
        let codec = engine.codec();
        let files = audio::list_audio_files(&dir, engine.show_hidden()).map_err(invalid)?;

        // Files that carry the field, plus unreadable ones so their error is
        // reported by the batch.
        let mut targets = Vec::new();
        let mut old_values: HashMap<String, String> = HashMap::new();
        for file in &files {
            match codec.read_field(Path::new(file), &field) {
                Ok(Some(old)) if !old.is_empty() => {
                    old_values.insert(file.clone(), old);
                    targets.push(file.clone());
                }
                Ok(_) => {}
                Err(_) => targets.push(file.clone()),
            }
        }
        let skipped = files.len() - targets.len();

        let outcome = batch::apply_to_files(&targets, "updated", |file| {
            codec.delete_field(Path::new(file), &field)
        });

        let name = codec.semantic_field_name(&dir, &field);
        let changes: Vec<(String, String)> = outcome
            .succeeded
            .iter()
            .filter_map(|f| old_values.get(f).map(|old| (f.clone(), old.clone())))
            .collect();
        let id = if changes.is_empty() || outcome.is_error() {
            None
        } else {
            Some(
                engine
                    .record_action(Action::batch_delete_field(&name, &changes))
                    .map_err(history_error)?,
            )
        };
        Ok((outcome, skipped, name, id))
    })
    .await?;

    let payload = batch_payload(
        &outcome,
        serde_json::json!({
            "folder": server.relative(&folder),
            "field": name,
            "files_skipped": skipped,
            "action_id": id,
        }),
    );
    outcome_result(&outcome, &payload)
}

pub(super) async fn handle_apply_art_to_folder(
    server: &MetaRemoteServer,
    params: FolderArtParams,
) -> Result<CallToolResult, McpError> {
    let folder = server.resolve_dir(&params.folder)?;
    let image = server.read_image(&params.image_path)?;
    let engine = server.engine().clone();
    let dir = folder.clone();

    let (outcome, id) = blocking(move || {
        let codec = engine.codec();
        let new_ref = engine.store_art(&image).map_err(history_error)?;

        let mut old_refs: HashMap<String, Option<ArtRef>> = HashMap::new();
        let result = engine.run_batch_mutation(&dir, "updated", |file| {
            let path = Path::new(file);
            let old = codec.read_art(path).map_err(|e| e.to_string())?;
            let old_ref = old
                .as_deref()
                .map(|bytes| engine.store_art(bytes))
                .transpose()
                .map_err(|e| e.to_string())?;
            if let Err(e) = codec.write_art(path, &image) {
                engine.release_unrecorded(old_ref.iter());
                return Err(e.to_string());
            }
            old_refs.insert(file.to_string(), old_ref);
            Ok(())
        });
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                engine.release_unrecorded([&new_ref]);
                return Err(invalid(e));
            }
        };

        let changes: Vec<(String, Option<ArtRef>)> = outcome
            .succeeded
            .iter()
            .map(|f| (f.clone(), old_refs.remove(f).flatten()))
            .collect();
        if changes.is_empty() {
            engine.release_unrecorded([&new_ref]);
            return Ok((outcome, None));
        }

        let action = Action::batch_album_art(&changes, &new_ref);
        match engine.record_action(action) {
            Ok(id) => Ok((outcome, Some(id))),
            Err(e) => {
                let stored: Vec<&ArtRef> = changes
                    .iter()
                    .filter_map(|(_, r)| r.as_ref())
                    .chain(std::iter::once(&new_ref))
                    .collect();
                engine.release_unrecorded(stored);
                Err(history_error(e))
            }
        }
    })
    .await?;

    let payload = batch_payload(
        &outcome,
        serde_json::json!({
            "folder": server.relative(&folder),
            "action_id": id,
        }),
    );
    outcome_result(&outcome, &payload)
}
