pub mod controller;
pub mod repo;
pub mod service;

pub use service::CommandConfig;

use async_trait::async_trait;
use capmux_core::config::load_prompt;
use capmux_core::merge::merge_and_check;
use capmux_core::{
    config_snapshot, CapabilityProvider, CapabilitySet, ProviderContext, ProviderFactory, Result,
};
use controller::CommandProviderController;
use repo::{CommandRepository, ShellCommandRepository};
use serde_json::{Map, Value};
use service::CommandProviderService;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const COMMAND_PROVIDER_NAME: &str = "Command";

const COMMAND_PROMPT_DEFAULT: &str = "\
You are a command-line assistant running on the user's machine. You can run shell \
commands through the `execute_command` tool.

- Only programs on the allow list may run; every part of a pipeline or command list is checked.
- Prefer read-only commands. Explain what a command will do before running anything that changes state.
- Commands are killed when they exceed the configured timeout.
- Report the command output faithfully, including errors and non-zero exit codes.
";

/// Shell command execution restricted to an allow list.
pub struct CommandProvider {
    ctx: ProviderContext,
    caps: CapabilitySet,
    config: CommandConfig,
    repo: Arc<dyn CommandRepository>,
    inflight: CancellationToken,
}

impl CommandProvider {
    pub fn new(ctx: ProviderContext) -> Self {
        Self::with_repository(ctx, Arc::new(ShellCommandRepository::new()))
    }

    pub fn with_repository(ctx: ProviderContext, repo: Arc<dyn CommandRepository>) -> Self {
        let inflight = ctx.cancel_token().child_token();
        Self {
            ctx,
            caps: CapabilitySet::new(COMMAND_PROVIDER_NAME),
            config: CommandConfig::default(),
            repo,
            inflight,
        }
    }

    pub fn factory() -> ProviderFactory {
        Arc::new(|ctx: ProviderContext| -> Result<Box<dyn CapabilityProvider>> {
            Ok(Box::new(CommandProvider::new(ctx)))
        })
    }

    pub fn settings(&self) -> &CommandConfig {
        &self.config
    }
}

#[async_trait]
impl CapabilityProvider for CommandProvider {
    fn name(&self) -> &'static str {
        COMMAND_PROVIDER_NAME
    }

    fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.caps
    }

    fn config(&self) -> String {
        config_snapshot(COMMAND_PROVIDER_NAME, &self.config)
    }

    fn load_config(&mut self, section: &Map<String, Value>) -> Result<()> {
        merge_and_check(&mut self.config, section)
    }

    async fn init(&mut self) -> Result<()> {
        let prompt = load_prompt(&self.config.prompt_file, COMMAND_PROMPT_DEFAULT)?;
        let service = CommandProviderService::new(Arc::clone(&self.repo), &self.config);
        let controller = Arc::new(CommandProviderController::new(
            service,
            prompt,
            self.inflight.clone(),
        ));
        controller.register(&self.caps)?;

        info!(
            parent: self.ctx.span(),
            allowed = %self.config.allowed_command,
            timeout = self.config.timeout,
            "command provider initialized"
        );
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.inflight.cancel();
        info!(parent: self.ctx.span(), "command provider closed");
        Ok(())
    }
}
