use std::path::{Path, PathBuf};
use std::sync::Arc;

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use serde::Serialize;

mod edit_handlers;
mod folder_handlers;
mod fs_handlers;
mod history_handlers;
mod params;

use params::*;

use crate::audio;
use crate::batch::BatchOutcome;
use crate::config::Config;
use crate::engine::Engine;
use crate::history::HistoryError;
use crate::tags::TagError;

fn internal(msg: String) -> McpError {
    McpError::internal_error(msg, None)
}

fn invalid(msg: String) -> McpError {
    McpError::invalid_params(msg, None)
}

/// User-facing history errors become `invalid_params`; the rest are internal.
fn history_error(e: HistoryError) -> McpError {
    match e {
        HistoryError::NotFound(_)
        | HistoryError::AlreadyUndone(_)
        | HistoryError::NotUndone(_)
        | HistoryError::Busy(_) => invalid(e.to_string()),
        HistoryError::InvalidAction(_) | HistoryError::DuplicateId(_) | HistoryError::Art(_) => {
            internal(e.to_string())
        }
    }
}

fn tag_error(e: TagError) -> McpError {
    match e {
        TagError::Validation(_) | TagError::Unsupported(_) => invalid(e.to_string()),
        TagError::Io(_) => internal(e.to_string()),
    }
}

fn json_result(value: &impl Serialize) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| internal(format!("{e}")))?;
    Ok(CallToolResult::success(vec![Content::text(json)]))
}

/// Batch-shaped payloads: a fully failed batch is a tool error, not a success.
fn outcome_result(
    outcome: &BatchOutcome,
    value: &impl Serialize,
) -> Result<CallToolResult, McpError> {
    let json = serde_json::to_string_pretty(value).map_err(|e| internal(format!("{e}")))?;
    if outcome.is_error() {
        Ok(CallToolResult::error(vec![Content::text(json)]))
    } else {
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

/// Run codec/filesystem work off the async runtime.
async fn blocking<T, F>(work: F) -> Result<T, McpError>
where
    F: FnOnce() -> Result<T, McpError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| internal(format!("join error: {e}")))?
}

/// Treat whitespace-only values (a lone space from the UI) as empty.
fn normalize_value(value: &str) -> &str {
    if value.trim().is_empty() { "" } else { value }
}

/// Created fields need a value the codec will not treat as a delete.
fn stored_field_value(value: &str) -> String {
    if value.is_empty() {
        " ".to_string()
    } else {
        value.to_string()
    }
}

const MAX_FIELD_NAME_LEN: usize = 50;

fn validate_field_name(field: &str) -> Result<(), String> {
    let name = field.trim();
    if name.is_empty() {
        return Err("Field name must not be empty".to_string());
    }
    if name.chars().count() > MAX_FIELD_NAME_LEN {
        return Err(format!(
            "Field name must be at most {MAX_FIELD_NAME_LEN} characters"
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
    {
        return Err(
            "Field name may only contain letters, digits, underscores and spaces".to_string(),
        );
    }
    Ok(())
}

/// Inner shared state (not Clone).
struct ServerState {
    config: Config,
    engine: Engine,
}

#[derive(Clone)]
pub struct MetaRemoteServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

impl MetaRemoteServer {
    fn engine(&self) -> &Engine {
        &self.state.engine
    }

    fn music_dir(&self) -> &Path {
        &self.state.config.music_dir
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, McpError> {
        audio::resolve_in_root(self.music_dir(), relative).map_err(invalid)
    }

    fn resolve_audio_file(&self, relative: &str) -> Result<PathBuf, McpError> {
        let path = self.resolve(relative)?;
        if !path.is_file() {
            return Err(invalid(format!("File not found: {relative}")));
        }
        if !audio::is_audio_file(&path) {
            return Err(invalid(format!("Not an audio file: {relative}")));
        }
        Ok(path)
    }

    fn resolve_dir(&self, relative: &str) -> Result<PathBuf, McpError> {
        let path = self.resolve(relative)?;
        if !path.is_dir() {
            return Err(invalid(format!("Folder not found: {relative}")));
        }
        Ok(path)
    }

    fn relative(&self, path: &Path) -> String {
        audio::relative_to_root(self.music_dir(), path)
    }

    /// Image files, like audio files, must live under the music root.
    fn read_image(&self, image_path: &str) -> Result<Vec<u8>, McpError> {
        let candidate = Path::new(image_path);
        let path = if candidate.is_absolute() {
            let inside = candidate.strip_prefix(self.music_dir()).map_err(|_| {
                invalid(format!("Image path {image_path} is outside the music root"))
            })?;
            self.resolve(&inside.to_string_lossy())?
        } else {
            self.resolve(image_path)?
        };
        if !path.is_file() {
            return Err(invalid(format!("Image not found: {image_path}")));
        }
        let bytes = std::fs::read(&path)
            .map_err(|e| invalid(format!("Failed to read image {}: {e}", path.display())))?;
        if bytes.is_empty() {
            return Err(invalid(format!("Image file is empty: {}", path.display())));
        }
        Ok(bytes)
    }
}

#[tool_router]
impl MetaRemoteServer {
    pub fn new(config: Config, engine: Engine) -> Self {
        Self {
            state: Arc::new(ServerState { config, engine }),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Read the tag fields and album-art presence of one audio file")]
    async fn read_metadata(
        &self,
        params: Parameters<PathParams>,
    ) -> Result<CallToolResult, McpError> {
        edit_handlers::handle_read_metadata(self, params.0).await
    }

    #[tool(
        description = "Set tag fields and/or album art on one audio file. Each changed field is recorded as an undoable action."
    )]
    async fn set_metadata(
        &self,
        params: Parameters<SetMetadataParams>,
    ) -> Result<CallToolResult, McpError> {
        edit_handlers::handle_set_metadata(self, params.0).await
    }

    #[tool(description = "Delete a tag field from one audio file (undoable)")]
    async fn delete_field(
        &self,
        params: Parameters<FieldParams>,
    ) -> Result<CallToolResult, McpError> {
        edit_handlers::handle_delete_field(self, params.0).await
    }

    #[tool(
        description = "Create a tag field on one file, or on every audio file in its folder with apply_to_folder (undoable)"
    )]
    async fn create_field(
        &self,
        params: Parameters<CreateFieldParams>,
    ) -> Result<CallToolResult, McpError> {
        if params.0.apply_to_folder.unwrap_or(false) {
            folder_handlers::handle_create_field_in_folder(self, params.0).await
        } else {
            edit_handlers::handle_create_field(self, params.0).await
        }
    }

    #[tool(
        description = "Set one field to the same value on every audio file directly inside a folder (undoable as one action per kind)"
    )]
    async fn apply_field_to_folder(
        &self,
        params: Parameters<FolderFieldValueParams>,
    ) -> Result<CallToolResult, McpError> {
        folder_handlers::handle_apply_field_to_folder(self, params.0).await
    }

    #[tool(description = "Delete one field from every audio file directly inside a folder (undoable)")]
    async fn delete_field_from_folder(
        &self,
        params: Parameters<FolderFieldParams>,
    ) -> Result<CallToolResult, McpError> {
        folder_handlers::handle_delete_field_from_folder(self, params.0).await
    }

    #[tool(description = "Embed one image as album art in every audio file directly inside a folder (undoable)")]
    async fn apply_art_to_folder(
        &self,
        params: Parameters<FolderArtParams>,
    ) -> Result<CallToolResult, McpError> {
        folder_handlers::handle_apply_art_to_folder(self, params.0).await
    }

    #[tool(description = "Rename an audio file; history entries follow the file")]
    async fn rename_file(
        &self,
        params: Parameters<RenameParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_rename_file(self, params.0).await
    }

    #[tool(description = "Rename a folder; history entries for files inside it follow")]
    async fn rename_folder(
        &self,
        params: Parameters<RenameParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_rename_folder(self, params.0).await
    }

    #[tool(description = "Move a folder into another folder; history entries follow")]
    async fn move_folder(
        &self,
        params: Parameters<MoveFolderParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_move_folder(self, params.0).await
    }

    #[tool(description = "Create an empty folder; refuses to overwrite anything")]
    async fn create_folder(
        &self,
        params: Parameters<CreateFolderParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_create_folder(self, params.0).await
    }

    #[tool(
        description = "Delete a folder. A non-empty folder needs force. History entries for files inside it are kept but can no longer be replayed."
    )]
    async fn delete_folder(
        &self,
        params: Parameters<DeleteFolderParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_delete_folder(self, params.0).await
    }

    #[tool(description = "List the subfolders and audio files directly inside a folder")]
    async fn list_folder(
        &self,
        params: Parameters<ListFolderParams>,
    ) -> Result<CallToolResult, McpError> {
        fs_handlers::handle_list_folder(self, params.0).await
    }

    #[tool(description = "List recorded actions, most recent first")]
    async fn list_history(&self) -> Result<CallToolResult, McpError> {
        history_handlers::handle_list_history(self)
    }

    #[tool(description = "Get one recorded action with its per-file old and new values")]
    async fn get_history_action(
        &self,
        params: Parameters<ActionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        history_handlers::handle_get_history_action(self, params.0)
    }

    #[tool(description = "Undo a recorded action by re-applying its old values")]
    async fn undo_action(
        &self,
        params: Parameters<ActionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        history_handlers::handle_undo_action(self, params.0).await
    }

    #[tool(description = "Redo an undone action by re-applying its new values")]
    async fn redo_action(
        &self,
        params: Parameters<ActionIdParams>,
    ) -> Result<CallToolResult, McpError> {
        history_handlers::handle_redo_action(self, params.0).await
    }

    #[tool(description = "Drop all history and stored album art. Cannot be undone.")]
    async fn clear_history(&self) -> Result<CallToolResult, McpError> {
        history_handlers::handle_clear_history(self)
    }
}

#[tool_handler]
impl ServerHandler for MetaRemoteServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Audio metadata editor. Read and edit tags and album art on files under the \
                 music root, one file or a whole folder at a time, and undo or redo any edit \
                 from the history."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
