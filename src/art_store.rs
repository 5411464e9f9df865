//! Album-art blob storage.
//!
//! Actions never embed image bytes; they hold an [`ArtRef`] pointing at a
//! file under the store directory. Deletion is `pub(crate)` and only called by
//! the history log, which owns the reference counts.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ArtStoreError {
    #[error("Failed to create art store directory {path}: {source}")]
    Init { path: String, source: io::Error },
    #[error("Failed to write art blob {art_ref}: {source}")]
    Write { art_ref: ArtRef, source: io::Error },
    #[error("Failed to read art blob {art_ref}: {source}")]
    Read { art_ref: ArtRef, source: io::Error },
    #[error("Invalid art reference \"{0}\"")]
    InvalidRef(String),
}

/// Stable reference to a stored blob.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ArtRef(String);

impl ArtRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ArtRef {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for ArtRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where blobs live. A temp dir is removed when the store is dropped.
enum Root {
    Temp(TempDir),
    Dir(PathBuf),
}

pub struct ArtStore {
    root: Root,
}

const BLOB_EXTENSION: &str = "art";

impl ArtStore {
    /// Store blobs in a fresh temporary directory.
    pub fn temporary() -> Result<Self, ArtStoreError> {
        let dir = tempfile::Builder::new()
            .prefix("metaremote-art-")
            .tempdir()
            .map_err(|source| ArtStoreError::Init {
                path: std::env::temp_dir().display().to_string(),
                source,
            })?;
        Ok(Self {
            root: Root::Temp(dir),
        })
    }

    /// Store blobs under `dir`, creating it if needed. Blobs left there by an
    /// earlier process are removed, since no history refers to them.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Result<Self, ArtStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| ArtStoreError::Init {
            path: dir.display().to_string(),
            source,
        })?;
        let store = Self {
            root: Root::Dir(dir),
        };
        store.delete_all();
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        match &self.root {
            Root::Temp(t) => t.path(),
            Root::Dir(d) => d,
        }
    }

    fn blob_path(&self, art_ref: &ArtRef) -> Result<PathBuf, ArtStoreError> {
        let raw = art_ref.as_str();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ArtStoreError::InvalidRef(raw.to_string()));
        }
        Ok(self.dir().join(format!("{raw}.{BLOB_EXTENSION}")))
    }

    /// Persist `bytes` under a fresh UUID key.
    pub fn store(&self, bytes: &[u8]) -> Result<ArtRef, ArtStoreError> {
        let art_ref = ArtRef(Uuid::new_v4().to_string());
        let path = self.blob_path(&art_ref)?;
        fs::write(&path, bytes).map_err(|source| ArtStoreError::Write {
            art_ref: art_ref.clone(),
            source,
        })?;
        Ok(art_ref)
    }

    /// `Ok(None)` when the blob does not exist.
    pub fn load(&self, art_ref: &ArtRef) -> Result<Option<Vec<u8>>, ArtStoreError> {
        let path = self.blob_path(art_ref)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ArtStoreError::Read {
                art_ref: art_ref.clone(),
                source,
            }),
        }
    }

    pub(crate) fn delete(&self, art_ref: &ArtRef) {
        let Ok(path) = self.blob_path(art_ref) else {
            return;
        };
        if let Err(e) = fs::remove_file(&path)
            && e.kind() != io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to delete art blob {art_ref}: {e}");
        }
    }

    /// Remove every blob in the store directory.
    fn delete_all(&self) {
        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!("Failed to list art store {}: {e}", self.dir().display());
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_blob = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e == BLOB_EXTENSION);
            if is_blob && let Err(e) = fs::remove_file(&path) {
                tracing::warn!("Failed to delete art blob {}: {e}", path.display());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn blob_count(&self) -> usize {
        fs::read_dir(self.dir())
            .map(|entries| {
                entries
                    .flatten()
                    .filter(|e| {
                        e.path()
                            .extension()
                            .is_some_and(|ext| ext == BLOB_EXTENSION)
                    })
                    .count()
            })
            .unwrap_or(0)
    }
}
