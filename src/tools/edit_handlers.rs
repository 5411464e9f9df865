use std::collections::BTreeMap;
use std::path::Path;

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

use super::*;
use crate::action::{Action, ActionId};
use crate::audio;

#[derive(Debug, Serialize)]
struct FieldFailure {
    field: String,
    reason: String,
}

#[derive(Debug, Default)]
struct EditReport {
    changed_fields: Vec<String>,
    album_art: Option<&'static str>,
    action_ids: Vec<ActionId>,
    errors: Vec<FieldFailure>,
}

pub(super) async fn handle_read_metadata(
    server: &MetaRemoteServer,
    params: PathParams,
) -> Result<CallToolResult, McpError> {
    let path = server.resolve_audio_file(&params.path)?;
    let engine = server.engine().clone();
    let file = path.clone();
    let (fields, has_art) = blocking(move || {
        let codec = engine.codec();
        let fields = codec.read_fields(&file).map_err(tag_error)?;
        let has_art = codec.read_art(&file).map_err(tag_error)?.is_some();
        Ok((fields, has_art))
    })
    .await?;

    let fields: BTreeMap<String, String> = fields.into_iter().collect();
    json_result(&serde_json::json!({
        "path": server.relative(&path),
        "format": audio::base_format(&path),
        "fields": fields,
        "has_album_art": has_art,
    }))
}

pub(super) async fn handle_set_metadata(
    server: &MetaRemoteServer,
    params: SetMetadataParams,
) -> Result<CallToolResult, McpError> {
    let path = server.resolve_audio_file(&params.path)?;
    let fields = params.fields.unwrap_or_default();
    let remove_art = params.remove_art.unwrap_or(false);
    if remove_art && params.image_path.is_some() {
        return Err(invalid(
            "Provide either image_path or remove_art, not both".to_string(),
        ));
    }
    let image = params
        .image_path
        .as_deref()
        .map(|p| server.read_image(p))
        .transpose()?;
    if fields.is_empty() && image.is_none() && !remove_art {
        return Err(invalid(
            "Nothing to change: provide fields, image_path or remove_art".to_string(),
        ));
    }

    let engine = server.engine().clone();
    let file = path.clone();
    let report = blocking(move || apply_edit(&engine, &file, &fields, image.as_deref(), remove_art))
        .await?;

    let output = serde_json::json!({
        "path": server.relative(&path),
        "changed_fields": report.changed_fields,
        "album_art": report.album_art,
        "action_ids": report.action_ids,
        "errors": report.errors,
    });
    let json = serde_json::to_string_pretty(&output).map_err(|e| internal(format!("{e}")))?;
    if report.action_ids.is_empty() && !report.errors.is_empty() {
        return Ok(CallToolResult::error(vec![Content::text(json)]));
    }
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Apply each changed field, then the art change, recording one action per
/// successful mutation. Unchanged fields are skipped.
fn apply_edit(
    engine: &Engine,
    path: &Path,
    fields: &BTreeMap<String, String>,
    image: Option<&[u8]>,
    remove_art: bool,
) -> Result<EditReport, McpError> {
    let codec = engine.codec();
    let file = path.to_string_lossy().to_string();
    let mut report = EditReport::default();

    for (field, value) in fields {
        let new = normalize_value(value);
        let old = match codec.read_field(path, field) {
            Ok(v) => v.unwrap_or_default(),
            Err(e) => {
                report.errors.push(FieldFailure {
                    field: field.clone(),
                    reason: e.to_string(),
                });
                continue;
            }
        };
        if normalize_value(&old) == new {
            continue;
        }
        if let Err(e) = codec.write_field(path, field, new) {
            tracing::warn!("set_metadata: {field} on {file} failed: {e}");
            report.errors.push(FieldFailure {
                field: field.clone(),
                reason: e.to_string(),
            });
            continue;
        }
        let name = codec.semantic_field_name(path, field);
        let id = engine
            .record_action(Action::metadata_change(&file, &name, &old, new))
            .map_err(history_error)?;
        report.changed_fields.push(name);
        report.action_ids.push(id);
    }

    if image.is_some() || remove_art {
        match replace_art(engine, path, image) {
            Ok(Some(id)) => {
                report.album_art = Some(if image.is_some() { "changed" } else { "removed" });
                report.action_ids.push(id);
            }
            Ok(None) => {}
            Err(reason) => report.errors.push(FieldFailure {
                field: "album_art".to_string(),
                reason,
            }),
        }
    }

    Ok(report)
}

/// Write `image` (or remove art when `None`) and record the change.
/// `Ok(None)` when there was no art to remove.
fn replace_art(
    engine: &Engine,
    path: &Path,
    image: Option<&[u8]>,
) -> Result<Option<ActionId>, String> {
    let codec = engine.codec();
    let file = path.to_string_lossy().to_string();
    let old = codec.read_art(path).map_err(|e| e.to_string())?;
    if image.is_none() && old.is_none() {
        return Ok(None);
    }

    let old_ref = old
        .as_deref()
        .map(|bytes| engine.store_art(bytes))
        .transpose()
        .map_err(|e| e.to_string())?;
    let new_ref = match image.map(|bytes| engine.store_art(bytes)).transpose() {
        Ok(r) => r,
        Err(e) => {
            engine.release_unrecorded(old_ref.iter());
            return Err(e.to_string());
        }
    };

    let written = match image {
        Some(bytes) => codec.write_art(path, bytes),
        None => codec.remove_art(path),
    };
    if let Err(e) = written {
        engine.release_unrecorded(old_ref.iter().chain(new_ref.iter()));
        return Err(e.to_string());
    }

    let action = Action::album_art(&file, old_ref.clone(), new_ref.clone());
    engine.record_action(action).map(Some).map_err(|e| {
        engine.release_unrecorded(old_ref.iter().chain(new_ref.iter()));
        e.to_string()
    })
}

pub(super) async fn handle_delete_field(
    server: &MetaRemoteServer,
    params: FieldParams,
) -> Result<CallToolResult, McpError> {
    let path = server.resolve_audio_file(&params.path)?;
    let engine = server.engine().clone();
    let file = path.clone();
    let field = params.field;
    let display = params.path;
    let (name, old, id) = blocking(move || {
        let codec = engine.codec();
        let old = codec
            .read_field(&file, &field)
            .map_err(tag_error)?
            .filter(|v| !v.is_empty())
            .ok_or_else(|| invalid(format!("Field \"{field}\" not found in {display}")))?;
        codec.delete_field(&file, &field).map_err(tag_error)?;
        let name = codec.semantic_field_name(&file, &field);
        let id = engine
            .record_action(Action::delete_field(&file.to_string_lossy(), &name, &old))
            .map_err(history_error)?;
        Ok((name, old, id))
    })
    .await?;

    json_result(&serde_json::json!({
        "path": server.relative(&path),
        "field": name,
        "old_value": old,
        "action_id": id,
    }))
}

pub(super) async fn handle_create_field(
    server: &MetaRemoteServer,
    params: CreateFieldParams,
) -> Result<CallToolResult, McpError> {
    validate_field_name(&params.field).map_err(invalid)?;
    let path = server.resolve_audio_file(&params.path)?;
    let engine = server.engine().clone();
    let file = path.clone();
    let field = params.field.trim().to_string();
    let value = stored_field_value(params.value.as_deref().unwrap_or_default());

    let (native, existed, id) = blocking(move || {
        let codec = engine.codec();
        let native = codec.native_field_name(&file, &field);
        let existing = codec
            .read_field(&file, &native)
            .map_err(tag_error)?
            .unwrap_or_default();
        if existing == value {
            return Ok((native, true, None));
        }
        codec.write_field(&file, &native, &value).map_err(tag_error)?;

        let path_str = file.to_string_lossy();
        let action = if existing.is_empty() {
            Action::create_field(&path_str, &native, &value)
        } else {
            Action::field_overwrite(&path_str, &native, &existing, &value)
        };
        let id = engine.record_action(action).map_err(history_error)?;
        Ok((native, !existing.is_empty(), Some(id)))
    })
    .await?;

    json_result(&serde_json::json!({
        "path": server.relative(&path),
        "field": native,
        "already_existed": existed,
        "action_id": id,
    }))
}
