use async_trait::async_trait;
use capmux_core::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub path: PathBuf,
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
    pub readonly: bool,
    pub modified: Option<DateTime<Utc>>,
    pub accessed: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FileSystemRepository: Send + Sync {
    async fn read_to_string(&self, path: PathBuf) -> Result<String>;
    async fn write(&self, path: PathBuf, contents: String) -> Result<()>;
    async fn list_dir(&self, path: PathBuf) -> Result<Vec<DirEntryInfo>>;
    async fn create_dir_all(&self, path: PathBuf) -> Result<()>;
    async fn rename(&self, from: PathBuf, to: PathBuf) -> Result<()>;
    async fn metadata(&self, path: PathBuf) -> Result<FileInfo>;
    async fn canonicalize(&self, path: PathBuf) -> Result<PathBuf>;
    async fn exists(&self, path: PathBuf) -> bool;
}

#[derive(Debug, Default)]
pub struct TokioFileSystemRepository;

impl TokioFileSystemRepository {
    pub fn new() -> Self {
        Self
    }
}

fn io_error(action: &str, path: &Path, err: std::io::Error) -> CoreError {
    match err.kind() {
        std::io::ErrorKind::NotFound => {
            CoreError::NotFound(format!("{action} {}: {err}", path.display()))
        }
        std::io::ErrorKind::PermissionDenied => {
            CoreError::PermissionDenied(format!("{action} {}: {err}", path.display()))
        }
        _ => CoreError::Io(format!("{action} {}: {err}", path.display())),
    }
}

#[async_trait]
impl FileSystemRepository for TokioFileSystemRepository {
    async fn read_to_string(&self, path: PathBuf) -> Result<String> {
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| io_error("failed to read", &path, e))
    }

    async fn write(&self, path: PathBuf, contents: String) -> Result<()> {
        tokio::fs::write(&path, contents)
            .await
            .map_err(|e| io_error("failed to write", &path, e))
    }

    async fn list_dir(&self, path: PathBuf) -> Result<Vec<DirEntryInfo>> {
        let mut reader = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| io_error("failed to list", &path, e))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| io_error("failed to list", &path, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|kind| kind.is_dir())
                .unwrap_or(false);
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir,
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn create_dir_all(&self, path: PathBuf) -> Result<()> {
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error("failed to create", &path, e))
    }

    async fn rename(&self, from: PathBuf, to: PathBuf) -> Result<()> {
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| io_error("failed to move", &from, e))
    }

    async fn metadata(&self, path: PathBuf) -> Result<FileInfo> {
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error("failed to stat", &path, e))?;

        Ok(FileInfo {
            size: meta.len(),
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            readonly: meta.permissions().readonly(),
            modified: meta.modified().ok().map(DateTime::<Utc>::from),
            accessed: meta.accessed().ok().map(DateTime::<Utc>::from),
            created: meta.created().ok().map(DateTime::<Utc>::from),
            path,
        })
    }

    async fn canonicalize(&self, path: PathBuf) -> Result<PathBuf> {
        tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| io_error("failed to resolve", &path, e))
    }

    async fn exists(&self, path: PathBuf) -> bool {
        tokio::fs::try_exists(&path).await.unwrap_or(false)
    }
}
