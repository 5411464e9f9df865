use std::path::{Component, Path, PathBuf};

/// Extensions (lowercase, no dot) treated as audio files.
pub const AUDIO_EXTENSIONS: &[&str] = &["mp3", "flac", "wav", "m4a", "m4b", "wma", "wv", "ogg", "opus"];

/// Formats whose containers cannot carry embedded pictures.
pub const NO_EMBEDDED_ART: &[&str] = &["wav", "wv"];

/// Lowercase extension of `path`, or `""`.
pub fn base_format(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default()
}

pub fn is_audio_file(path: &Path) -> bool {
    AUDIO_EXTENSIONS.contains(&base_format(path).as_str())
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

/// Audio files directly inside `dir` (non-recursive), sorted.
pub fn list_audio_files(dir: &Path, show_hidden: bool) -> Result<Vec<String>, String> {
    if !dir.is_dir() {
        return Err(format!("Not a directory: {}", dir.display()));
    }

    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory {}: {e}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("Directory entry error: {e}"))?;
        let path = entry.path();
        if !path.is_file() || !is_audio_file(&path) {
            continue;
        }
        if !show_hidden && is_hidden(&path) {
            continue;
        }
        files.push(path.display().to_string());
    }

    files.sort();
    Ok(files)
}

/// Folders directly inside `dir`, sorted.
pub fn list_subfolders(dir: &Path, show_hidden: bool) -> Result<Vec<String>, String> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| format!("Failed to read directory {}: {e}", dir.display()))?;

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("Directory entry error: {e}"))?;
        let path = entry.path();
        if !path.is_dir() || (!show_hidden && is_hidden(&path)) {
            continue;
        }
        folders.push(path.display().to_string());
    }

    folders.sort();
    Ok(folders)
}

/// Resolve a path relative to the music root, refusing anything that would
/// escape it. An empty `relative` resolves to the root itself.
pub fn resolve_in_root(root: &Path, relative: &str) -> Result<PathBuf, String> {
    let rel = Path::new(relative.trim_start_matches('/'));
    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;

    for component in rel.components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return Err(format!("Invalid path \"{relative}\": escapes music root"));
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => {
                return Err(format!("Invalid path \"{relative}\""));
            }
        }
    }

    Ok(resolved)
}

/// Path of `path` relative to `root`, for responses.
pub fn relative_to_root(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}
