use crate::{CoreError, Result};
use capmux_proto::{
    NotificationHandler, Prompt, PromptEntry, PromptHandler, Resource, ResourceEntry,
    ResourceHandler, ResourceTemplate, ResourceTemplateEntry, ResourceTemplateHandler, Tool,
    ToolEntry, ToolHandler,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Collections {
    resources: BTreeMap<String, ResourceEntry>,
    templates: BTreeMap<String, ResourceTemplateEntry>,
    prompts: Vec<PromptEntry>,
    tools: Vec<ToolEntry>,
    notifications: BTreeMap<String, NotificationHandler>,
    frozen: bool,
}

/// Capabilities a provider registers during `init()`.
///
/// Mutable until the adapter copies it into the endpoint, read-only after.
pub struct CapabilitySet {
    owner: String,
    inner: RwLock<Collections>,
}

impl CapabilitySet {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            inner: RwLock::new(Collections::default()),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>> {
        let guard = self
            .inner
            .write()
            .map_err(|_| CoreError::LockPoisoned(format!("capabilities of {}", self.owner)))?;
        if guard.frozen {
            return Err(CoreError::CapabilitiesFrozen(self.owner.clone()));
        }
        Ok(guard)
    }

    // Readers only copy data out, so a poisoned lock is still consistent.
    fn read(&self) -> RwLockReadGuard<'_, Collections> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn add_resource(&self, resource: Resource, handler: ResourceHandler) -> Result<()> {
        let mut inner = self.write()?;
        inner
            .resources
            .insert(resource.uri.clone(), ResourceEntry { resource, handler });
        Ok(())
    }

    pub fn add_resource_template(
        &self,
        template: ResourceTemplate,
        handler: ResourceTemplateHandler,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner.templates.insert(
            template.uri_template.clone(),
            ResourceTemplateEntry { template, handler },
        );
        Ok(())
    }

    pub fn add_prompt(&self, prompt: Prompt, handler: PromptHandler) -> Result<()> {
        let mut inner = self.write()?;
        inner.prompts.push(PromptEntry { prompt, handler });
        Ok(())
    }

    pub fn add_tool(&self, tool: Tool, handler: ToolHandler) -> Result<()> {
        let mut inner = self.write()?;
        inner.tools.push(ToolEntry { tool, handler });
        Ok(())
    }

    pub fn add_notification_handler(
        &self,
        method: impl Into<String>,
        handler: NotificationHandler,
    ) -> Result<()> {
        let mut inner = self.write()?;
        inner.notifications.insert(method.into(), handler);
        Ok(())
    }

    pub fn resources(&self) -> Vec<ResourceEntry> {
        self.read().resources.values().cloned().collect()
    }

    pub fn resource_templates(&self) -> Vec<ResourceTemplateEntry> {
        self.read().templates.values().cloned().collect()
    }

    pub fn prompts(&self) -> Vec<PromptEntry> {
        self.read().prompts.clone()
    }

    pub fn tools(&self) -> Vec<ToolEntry> {
        self.read().tools.clone()
    }

    pub fn notification_handlers(&self) -> Vec<(String, NotificationHandler)> {
        self.read()
            .notifications
            .iter()
            .map(|(method, handler)| (method.clone(), handler.clone()))
            .collect()
    }

    pub fn freeze(&self) {
        let mut inner = self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        inner.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.read().frozen
    }

    pub fn is_empty(&self) -> bool {
        let inner = self.read();
        inner.resources.is_empty()
            && inner.templates.is_empty()
            && inner.prompts.is_empty()
            && inner.tools.is_empty()
            && inner.notifications.is_empty()
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.read();
        f.debug_struct("CapabilitySet")
            .field("owner", &self.owner)
            .field("resources", &inner.resources.len())
            .field("templates", &inner.templates.len())
            .field("prompts", &inner.prompts.len())
            .field("tools", &inner.tools.len())
            .field("notifications", &inner.notifications.len())
            .field("frozen", &inner.frozen)
            .finish()
    }
}
