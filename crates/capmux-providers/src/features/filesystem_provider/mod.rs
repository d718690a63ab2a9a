pub mod controller;
pub mod repo;
pub mod service;

pub use service::FileSystemConfig;

use async_trait::async_trait;
use capmux_core::config::load_prompt;
use capmux_core::merge::merge_and_check;
use capmux_core::{
    config_snapshot, CapabilityProvider, CapabilitySet, ProviderContext, ProviderFactory, Result,
};
use controller::FileSystemProviderController;
use repo::{FileSystemRepository, TokioFileSystemRepository};
use serde_json::{Map, Value};
use service::FileSystemProviderService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const FILESYSTEM_PROVIDER_NAME: &str = "FileSystem";

const FILESYSTEM_PROMPT_DEFAULT: &str = "\
You are a file management assistant with access to a sandboxed part of the user's filesystem.

- Use `list_allowed_directories` first to learn which directories you may touch.
- Read before you write, and never overwrite a file without saying so.
- `move_file` refuses to replace an existing destination.
- Use `search_files` and `get_file_info` to explore instead of guessing paths.
";

/// File access confined to the configured allowed directories.
pub struct FileSystemProvider {
    ctx: ProviderContext,
    caps: CapabilitySet,
    config: FileSystemConfig,
    repo: Arc<dyn FileSystemRepository>,
}

impl FileSystemProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        let config = FileSystemConfig::for_host(ctx.host());
        Self {
            ctx,
            caps: CapabilitySet::new(FILESYSTEM_PROVIDER_NAME),
            config,
            repo: Arc::new(TokioFileSystemRepository::new()),
        }
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|ctx: ProviderContext| -> Result<Box<dyn CapabilityProvider>> {
            Ok(Box::new(FileSystemProvider::new(ctx)))
        })
    }

    pub fn settings(&self) -> &FileSystemConfig {
        &self.config
    }

    async fn prepare_directories(&self) -> Result<Vec<PathBuf>> {
        if !self.config.cache_path.is_empty() {
            self.repo
                .create_dir_all(PathBuf::from(&self.config.cache_path))
                .await?;
        }

        let mut allowed = Vec::new();
        for dir in self.config.allowed_dirs() {
            self.repo.create_dir_all(dir.clone()).await?;
            let canonical = self.repo.canonicalize(dir).await?;
            if !allowed.contains(&canonical) {
                allowed.push(canonical);
            }
        }
        Ok(allowed)
    }
}

#[async_trait]
impl CapabilityProvider for FileSystemProvider {
    fn name(&self) -> &'static str {
        FILESYSTEM_PROVIDER_NAME
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    fn config(&self) -> String {
        config_snapshot(FILESYSTEM_PROVIDER_NAME, &self.config)
    }

    fn load_config(&mut self, section: &Map<String, Value>) -> Result<()> {
        merge_and_check(&mut self.config, section)
    }

    async fn init(&mut self) -> Result<()> {
        let prompt = load_prompt(&self.config.prompt_file, FILESYSTEM_PROMPT_DEFAULT)?;
        let allowed = self.prepare_directories().await?;
        let service = FileSystemProviderService::new(Arc::clone(&self.repo), allowed.clone());
        let controller = Arc::new(FileSystemProviderController::new(service, prompt));
        controller.register(&self.caps)?;

        info!(
            parent: self.ctx.span(),
            allowed = ?allowed,
            "filesystem provider initialized"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        info!(parent: self.ctx.span(), "filesystem provider closed");
        Ok(())
    }
}
