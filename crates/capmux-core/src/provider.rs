use crate::capability::CapabilitySet;
use crate::config::HostConfig;
use crate::Result;
use async_trait::async_trait;
use capmux_proto::{
    NotificationHandler, PromptEntry, ResourceEntry, ResourceTemplateEntry, ToolEntry,
};
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Span};

/// Dependencies handed to a provider at construction.
#[derive(Clone)]
pub struct ProviderContext {
    name: String,
    host: Arc<HostConfig>,
    cancel: CancellationToken,
    span: Span,
}

impl ProviderContext {
    pub fn new(name: impl Into<String>, host: Arc<HostConfig>, cancel: CancellationToken) -> Self {
        let name = name.into();
        let span = tracing::info_span!("provider", name = %name);
        Self {
            name,
            host,
            cancel,
            span,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    pub fn host_arc(&self) -> Arc<HostConfig> {
        Arc::clone(&self.host)
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }
}

impl fmt::Debug for ProviderContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderContext")
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Contract every capability provider implements.
///
/// The orchestrator drives `load_config` (only when the config document has a
/// section for the provider), then `init`, then copies the capabilities into
/// the endpoint. `close` is called exactly once, possibly after a failed or
/// partial `init`, and the caller bounds it with a deadline.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// Registry key and config section key.
    fn name(&self) -> &'static str;

    fn context(&self) -> &ProviderContext;

    fn capabilities(&self) -> &CapabilitySet;

    fn resources(&self) -> Vec<ResourceEntry> {
        self.capabilities().resources()
    }

    fn resource_templates(&self) -> Vec<ResourceTemplateEntry> {
        self.capabilities().resource_templates()
    }

    fn prompts(&self) -> Vec<PromptEntry> {
        self.capabilities().prompts()
    }

    fn tools(&self) -> Vec<ToolEntry> {
        self.capabilities().tools()
    }

    fn notification_handlers(&self) -> Vec<(String, NotificationHandler)> {
        self.capabilities().notification_handlers()
    }

    /// JSON snapshot of the typed config. Never fails.
    fn config(&self) -> String;

    fn load_config(&mut self, section: &Map<String, Value>) -> Result<()>;

    async fn init(&mut self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

pub type ProviderFactory =
    Arc<dyn Fn(ProviderContext) -> Result<Box<dyn CapabilityProvider>> + Send + Sync>;

/// Serializes a provider config, logging and returning `"{}"` on failure.
pub fn config_snapshot<T: Serialize>(provider: &str, config: &T) -> String {
    match serde_json::to_string(config) {
        Ok(json) => json,
        Err(error) => {
            warn!(provider = provider, error = %error, "failed to serialize provider config");
            "{}".to_string()
        }
    }
}
