use std::path::{Path, PathBuf};

use rmcp::ErrorData as McpError;
use rmcp::model::CallToolResult;

use super::*;

const MAX_NAME_LEN: usize = 255;
const FORBIDDEN_CHARS: &[char] = &['/', '\\', '<', '>', ':', '"', '|', '?', '*'];
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a single path component supplied by the user.
fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("Name must not be empty".to_string());
    }
    if name == "." || name == ".." {
        return Err(format!("Invalid name \"{name}\""));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(format!("Name must be at most {MAX_NAME_LEN} characters"));
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN_CHARS.contains(c) || c.is_control()) {
        return Err(format!("Name contains invalid character {c:?}"));
    }
    let stem = name.split('.').next().unwrap_or(name).trim().to_uppercase();
    if RESERVED_NAMES.contains(&stem.as_str()) {
        return Err(format!("\"{name}\" is a reserved name"));
    }
    Ok(())
}

/// `new_name` with the extension of `old` appended when it has none.
fn with_extension(old: &Path, new_name: &str) -> String {
    match old.extension().and_then(|e| e.to_str()) {
        Some(ext) if Path::new(new_name).extension().is_none() => format!("{new_name}.{ext}"),
        _ => new_name.to_string(),
    }
}

fn rename_path(from: &Path, to: &Path) -> Result<(), McpError> {
    if to.exists() {
        return Err(invalid(format!("{} already exists", to.display())));
    }
    std::fs::rename(from, to).map_err(|e| {
        internal(format!(
            "Failed to rename {} to {}: {e}",
            from.display(),
            to.display()
        ))
    })
}

fn sibling(path: &Path, name: &str) -> Result<PathBuf, McpError> {
    path.parent()
        .map(|parent| parent.join(name))
        .ok_or_else(|| invalid(format!("Cannot rename {}", path.display())))
}

pub(super) async fn handle_rename_file(
    server: &MetaRemoteServer,
    params: RenameParams,
) -> Result<CallToolResult, McpError> {
    let from = server.resolve_audio_file(&params.path)?;
    let name = with_extension(&from, params.new_name.trim());
    validate_name(&name).map_err(invalid)?;
    let to = sibling(&from, &name)?;
    if to == from {
        return Err(invalid("New name is the same as the old one".to_string()));
    }

    let engine = server.engine().clone();
    let (src, dst) = (from.clone(), to.clone());
    let touched = blocking(move || {
        rename_path(&src, &dst)?;
        Ok(engine.notify_path_renamed(&src, &dst))
    })
    .await?;

    json_result(&serde_json::json!({
        "old_path": server.relative(&from),
        "new_path": server.relative(&to),
        "history_actions_updated": touched,
    }))
}

pub(super) async fn handle_rename_folder(
    server: &MetaRemoteServer,
    params: RenameParams,
) -> Result<CallToolResult, McpError> {
    let from = server.resolve_dir(&params.path)?;
    if from == server.music_dir() {
        return Err(invalid("Cannot rename the music root".to_string()));
    }
    let name = params.new_name.trim();
    validate_name(name).map_err(invalid)?;
    let to = sibling(&from, name)?;
    if to == from {
        return Err(invalid("New name is the same as the old one".to_string()));
    }

    move_folder(server, from, to).await
}

pub(super) async fn handle_move_folder(
    server: &MetaRemoteServer,
    params: MoveFolderParams,
) -> Result<CallToolResult, McpError> {
    let from = server.resolve_dir(&params.path)?;
    if from == server.music_dir() {
        return Err(invalid("Cannot move the music root".to_string()));
    }
    let destination = server.resolve_dir(&params.destination)?;
    if destination.starts_with(&from) {
        return Err(invalid("Cannot move a folder into itself".to_string()));
    }
    let name = from
        .file_name()
        .ok_or_else(|| invalid(format!("Invalid folder {}", params.path)))?;
    let to = destination.join(name);
    if to == from {
        return Err(invalid("Folder is already in that location".to_string()));
    }

    move_folder(server, from, to).await
}

async fn move_folder(
    server: &MetaRemoteServer,
    from: PathBuf,
    to: PathBuf,
) -> Result<CallToolResult, McpError> {
    let engine = server.engine().clone();
    let (src, dst) = (from.clone(), to.clone());
    let touched = blocking(move || {
        rename_path(&src, &dst)?;
        Ok(engine.notify_folder_moved(&src, &dst))
    })
    .await?;

    json_result(&serde_json::json!({
        "old_path": server.relative(&from),
        "new_path": server.relative(&to),
        "history_actions_updated": touched,
    }))
}

/// Files and folders below `dir`, counted recursively. Symlinks count as
/// files and are not followed.
fn count_entries(dir: &Path) -> std::io::Result<(usize, usize)> {
    let (mut files, mut dirs) = (0, 0);
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            let (f, d) = count_entries(&entry.path())?;
            files += f;
            dirs += d + 1;
        } else {
            files += 1;
        }
    }
    Ok((files, dirs))
}

pub(super) async fn handle_create_folder(
    server: &MetaRemoteServer,
    params: CreateFolderParams,
) -> Result<CallToolResult, McpError> {
    let parent = server.resolve_dir(&params.parent)?;
    let name = params.name.trim();
    validate_name(name).map_err(invalid)?;
    if name.starts_with('.') {
        return Err(invalid("Folder name must not start with a dot".to_string()));
    }
    let path = parent.join(name);

    let target = path.clone();
    blocking(move || {
        if target.exists() {
            return Err(invalid(format!("{} already exists", target.display())));
        }
        std::fs::create_dir(&target)
            .map_err(|e| internal(format!("Failed to create {}: {e}", target.display())))
    })
    .await?;
    tracing::info!("Created folder {}", path.display());

    json_result(&serde_json::json!({ "path": server.relative(&path) }))
}

/// History entries for files under the folder are kept; replaying them later
/// fails per file.
pub(super) async fn handle_delete_folder(
    server: &MetaRemoteServer,
    params: DeleteFolderParams,
) -> Result<CallToolResult, McpError> {
    let path = server.resolve_dir(&params.path)?;
    if path == server.music_dir() {
        return Err(invalid("Cannot delete the music root".to_string()));
    }
    let force = params.force.unwrap_or(false);

    let target = path.clone();
    let (file_count, dir_count) = blocking(move || {
        let (files, dirs) = count_entries(&target)
            .map_err(|e| internal(format!("Failed to read {}: {e}", target.display())))?;
        if files + dirs > 0 && !force {
            return Err(invalid(format!(
                "Folder is not empty ({files} files, {dirs} folders); pass force to delete it"
            )));
        }
        std::fs::remove_dir_all(&target)
            .map_err(|e| internal(format!("Failed to delete {}: {e}", target.display())))?;
        Ok((files, dirs))
    })
    .await?;
    tracing::info!(
        "Deleted folder {} ({file_count} files, {dir_count} folders)",
        path.display()
    );

    json_result(&serde_json::json!({
        "path": server.relative(&path),
        "fileCount": file_count,
        "dirCount": dir_count,
    }))
}

/// Subfolders and audio files directly inside a folder. Hidden entries are
/// skipped unless the server shows hidden files.
pub(super) async fn handle_list_folder(
    server: &MetaRemoteServer,
    params: ListFolderParams,
) -> Result<CallToolResult, McpError> {
    let dir = server.resolve_dir(&params.path)?;
    let show_hidden = server.engine().show_hidden();

    let target = dir.clone();
    let (folders, files) = blocking(move || {
        let files = audio::list_audio_files(&target, show_hidden).map_err(internal)?;
        let folders = audio::list_subfolders(&target, show_hidden).map_err(internal)?;
        Ok((folders, files))
    })
    .await?;

    let name_of = |p: &String| {
        Path::new(p)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| p.clone())
    };
    json_result(&serde_json::json!({
        "path": server.relative(&dir),
        "folders": folders.iter().map(name_of).collect::<Vec<_>>(),
        "files": files.iter().map(name_of).collect::<Vec<_>>(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_validated() {
        assert!(validate_name("New Album (2024)").is_ok());
        assert!(validate_name("a/b").is_err());
        assert!(validate_name("what?").is_err());
        assert!(validate_name("..").is_err());
        assert!(validate_name("con").is_err());
        assert!(validate_name("LPT1.txt").is_err());
        assert!(validate_name("CONCERT").is_ok());
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn entries_are_counted_recursively() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("CD1/Scans")).unwrap();
        std::fs::write(dir.path().join("CD1/a.mp3"), b"").unwrap();
        std::fs::write(dir.path().join("CD1/Scans/front.jpg"), b"").unwrap();
        std::fs::write(dir.path().join("cover.jpg"), b"").unwrap();
        assert_eq!(count_entries(dir.path()).unwrap(), (3, 2));
        assert_eq!(count_entries(&dir.path().join("CD1/Scans")).unwrap(), (1, 0));
    }

    #[test]
    fn extension_is_kept_when_omitted() {
        let old = Path::new("/music/a.flac");
        assert_eq!(with_extension(old, "b"), "b.flac");
        assert_eq!(with_extension(old, "b.mp3"), "b.mp3");
    }
}
