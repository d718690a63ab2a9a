use crate::features::filesystem_provider::repo::{DirEntryInfo, FileSystemRepository};
use crate::split_list;
use capmux_core::config::check_prompt_file;
use capmux_core::{ConfigCheck, CoreError, HostConfig, Result};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const MAX_SEARCH_RESULTS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSystemConfig {
    pub prompt_file: String,
    /// Comma separated list of directories the provider may touch.
    pub allowed_dir: String,
    pub cache_path: String,
}

impl FileSystemConfig {
    pub fn for_host(host: &HostConfig) -> Self {
        Self {
            prompt_file: String::new(),
            allowed_dir: host.data_dir().to_string_lossy().into_owned(),
            cache_path: host.cache_dir().to_string_lossy().into_owned(),
        }
    }

    pub fn allowed_dirs(&self) -> Vec<PathBuf> {
        split_list(&self.allowed_dir)
            .into_iter()
            .map(PathBuf::from)
            .collect()
    }
}

impl ConfigCheck for FileSystemConfig {
    fn check(&self) -> Result<()> {
        let dirs = self.allowed_dirs();
        if dirs.is_empty() {
            return Err(CoreError::InvalidConfig(
                "allowed_dir must name at least one directory".to_string(),
            ));
        }
        if let Some(relative) = dirs.iter().find(|dir| !dir.is_absolute()) {
            return Err(CoreError::InvalidConfig(format!(
                "allowed_dir entry '{}' must be an absolute path",
                relative.display()
            )));
        }
        check_prompt_file(&self.prompt_file)
    }
}

/// Filesystem operations confined to a set of allowed directories.
pub struct FileSystemProviderService {
    repo: Arc<dyn FileSystemRepository>,
    allowed: Vec<PathBuf>,
}

impl FileSystemProviderService {
    /// `allowed` must already be canonical.
    pub fn new(repo: Arc<dyn FileSystemRepository>, allowed: Vec<PathBuf>) -> Self {
        Self { repo, allowed }
    }

    pub fn allowed_dirs(&self) -> &[PathBuf] {
        &self.allowed
    }

    /// Resolves `raw` to a canonical path inside an allowed directory.
    ///
    /// Relative paths are taken from the first allowed directory. Components
    /// that do not exist yet are appended to the canonical form of their
    /// nearest existing ancestor, so symlinks cannot escape the sandbox.
    pub async fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CoreError::InvalidArgument("path is empty".to_string()));
        }
        let base = self
            .allowed
            .first()
            .ok_or_else(|| CoreError::PermissionDenied("no allowed directories".to_string()))?;

        let requested = PathBuf::from(raw);
        let absolute = if requested.is_absolute() {
            requested
        } else {
            base.join(requested)
        };

        let mut existing = absolute.clone();
        let mut missing: Vec<OsString> = Vec::new();
        while !self.repo.exists(existing.clone()).await {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    missing.push(name.to_os_string());
                    existing = parent.to_path_buf();
                }
                _ => {
                    return Err(CoreError::InvalidArgument(format!(
                        "cannot resolve path '{}'",
                        absolute.display()
                    )))
                }
            }
        }

        let mut resolved = self.repo.canonicalize(existing).await?;
        for part in missing.iter().rev() {
            resolved.push(part);
        }

        if self.allowed.iter().any(|dir| resolved.starts_with(dir)) {
            Ok(resolved)
        } else {
            Err(CoreError::PermissionDenied(format!(
                "path '{}' is outside the allowed directories",
                absolute.display()
            )))
        }
    }

    pub async fn read_file(&self, path: &str) -> Result<String> {
        let path = self.resolve(path).await?;
        self.repo.read_to_string(path).await
    }

    pub async fn write_file(&self, path: &str, content: String) -> Result<String> {
        let path = self.resolve(path).await?;
        let size = content.len();
        self.repo.write(path.clone(), content).await?;
        Ok(format!("Wrote {size} bytes to {}", path.display()))
    }

    pub async fn list_directory(&self, path: &str) -> Result<String> {
        let path = self.resolve(path).await?;
        let entries = self.repo.list_dir(path).await?;
        Ok(format_entries(&entries))
    }

    pub async fn create_directory(&self, path: &str) -> Result<String> {
        let path = self.resolve(path).await?;
        self.repo.create_dir_all(path.clone()).await?;
        Ok(format!("Created directory {}", path.display()))
    }

    pub async fn move_file(&self, source: &str, destination: &str) -> Result<String> {
        let source = self.resolve(source).await?;
        let destination = self.resolve(destination).await?;
        if self.repo.exists(destination.clone()).await {
            return Err(CoreError::InvalidArgument(format!(
                "destination {} already exists",
                destination.display()
            )));
        }
        self.repo.rename(source.clone(), destination.clone()).await?;
        Ok(format!(
            "Moved {} to {}",
            source.display(),
            destination.display()
        ))
    }

    /// Case-insensitive substring match on file and directory names.
    pub async fn search_files(&self, path: &str, pattern: &str) -> Result<Vec<PathBuf>> {
        let root = self.resolve(path).await?;
        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();
        let mut pending = vec![root];

        while let Some(dir) = pending.pop() {
            let entries = match self.repo.list_dir(dir.clone()).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                    continue;
                }
            };
            for entry in entries {
                if entry.name.to_lowercase().contains(&needle) {
                    matches.push(entry.path.clone());
                    if matches.len() >= MAX_SEARCH_RESULTS {
                        return Ok(matches);
                    }
                }
                if entry.is_dir {
                    pending.push(entry.path);
                }
            }
        }

        matches.sort();
        Ok(matches)
    }

    pub async fn get_file_info(&self, path: &str) -> Result<String> {
        let path = self.resolve(path).await?;
        let info = self.repo.metadata(path).await?;
        Ok(serde_json::to_string_pretty(&info)?)
    }

    pub fn list_allowed_directories(&self) -> String {
        let dirs: Vec<String> = self
            .allowed
            .iter()
            .map(|dir| dir.display().to_string())
            .collect();
        format!("Allowed directories:\n{}", dirs.join("\n"))
    }
}

fn format_entries(entries: &[DirEntryInfo]) -> String {
    entries
        .iter()
        .map(|entry| {
            let tag = if entry.is_dir { "[DIR]" } else { "[FILE]" };
            format!("{tag} {}", entry.name)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
