//! Durable storage for downloaded sessions.
//!
//! Sessions land at `<root>/sessions/{id}.csv`. Writes go to a `.part` file
//! that is synced and renamed into place, so a returned path always refers
//! to a complete payload.
//!
//! # Usage
//!
//! ```ignore
//! use racesense_sync::storage::{session_path, FsSessionStore, SessionStore};
//!
//! let store = FsSessionStore::new("racesense-data");
//! let path = store.persist(&session_path("123")?, b"timestamp,x\n").await?;
//! ```

use async_trait::async_trait;
use log::debug;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Directory (relative to the store root) holding session files.
pub const SESSIONS_DIR: &str = "sessions";

/// Storage errors.
#[derive(Debug)]
pub enum StorageError {
    /// Path escapes the store root or is otherwise unusable.
    InvalidPath(String),
    /// Filesystem failure.
    Io(io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "invalid storage path: {}", path),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StorageError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Relative path of a session file: `sessions/{id}.csv`.
///
/// Ids are limited to ASCII letters, digits, `-`, `_` and single dots, so
/// they are safe both as file names and as URL path segments.
pub fn session_path(id: &str) -> Result<PathBuf, StorageError> {
    let invalid = id.is_empty()
        || id.starts_with('.')
        || id.contains("..")
        || !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if invalid {
        return Err(StorageError::InvalidPath(format!("session id {:?}", id)));
    }
    Ok(Path::new(SESSIONS_DIR).join(format!("{}.csv", id)))
}

/// Durable byte storage keyed by relative path.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Write `bytes` at `relative` and return the final path. The data is on
    /// disk when this returns.
    async fn persist(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError>;
}

/// Filesystem-backed store rooted at a directory.
#[derive(Debug, Clone)]
pub struct FsSessionStore {
    root: PathBuf,
}

impl FsSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join `relative` onto the root, rejecting anything but plain names.
    fn resolve(&self, relative: &Path) -> Result<PathBuf, StorageError> {
        let plain = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !plain || relative.file_name().is_none() {
            return Err(StorageError::InvalidPath(relative.display().to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Session files currently stored, sorted by path.
    pub fn list_sessions(&self) -> Result<Vec<PathBuf>, StorageError> {
        let pattern = self.root.join(SESSIONS_DIR).join("*.csv");
        let paths = glob::glob(&pattern.to_string_lossy())
            .map_err(|e| StorageError::InvalidPath(e.to_string()))?;

        let mut sessions = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => sessions.push(path),
                Err(e) => return Err(StorageError::Io(e.into_error())),
            }
        }
        sessions.sort();
        Ok(sessions)
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn persist(&self, relative: &Path, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut partial = path.clone().into_os_string();
        partial.push(".part");
        let partial = PathBuf::from(partial);

        let mut file = tokio::fs::File::create(&partial).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&partial, &path).await?;

        debug!("Persisted {} bytes to {}", bytes.len(), path.display());
        Ok(path)
    }
}
