use capmux_proto::{
    Implementation, NotificationHandler, Prompt, PromptEntry, PromptHandler, ProtocolEndpoint,
    Resource, ResourceEntry, ResourceHandler, ResourceTemplate, ResourceTemplateEntry,
    ResourceTemplateHandler, Tool, ToolEntry, UriTemplate,
};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    /// The tool ran and reported `isError`.
    ToolError,
    /// The call never produced a tool result.
    Failed,
}

impl ToolOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolOutcome::Success => "success",
            ToolOutcome::ToolError => "tool_error",
            ToolOutcome::Failed => "failed",
        }
    }
}

/// Called after every `tools/call` with the tool name and outcome.
pub type ToolObserver = Arc<dyn Fn(&str, ToolOutcome) + Send + Sync>;

/// Produces the text served at `/metrics`.
pub type MetricsRenderer = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Default)]
struct Tables {
    resources: BTreeMap<String, ResourceEntry>,
    templates: BTreeMap<String, ResourceTemplateEntry>,
    tools: Vec<ToolEntry>,
    prompts: Vec<PromptEntry>,
    notifications: HashMap<String, NotificationHandler>,
}

/// The single protocol surface every provider is adapted into.
///
/// Tables are written while providers are adapted and only read once
/// serving starts. Handlers are cloned out of the lock before they run.
pub struct McpEndpoint {
    info: Implementation,
    instructions: Option<String>,
    tables: RwLock<Tables>,
    inflight: AtomicUsize,
    observer: Option<ToolObserver>,
    metrics: Option<MetricsRenderer>,
}

impl McpEndpoint {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            info: Implementation {
                name: name.into(),
                title: None,
                version: version.into(),
                icons: None,
                website_url: None,
            },
            instructions: None,
            tables: RwLock::new(Tables::default()),
            inflight: AtomicUsize::new(0),
            observer: None,
            metrics: None,
        }
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        let instructions = instructions.into();
        self.instructions = (!instructions.is_empty()).then_some(instructions);
        self
    }

    pub fn with_tool_observer(mut self, observer: ToolObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_metrics(mut self, renderer: MetricsRenderer) -> Self {
        self.metrics = Some(renderer);
        self
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn render_metrics(&self) -> Option<String> {
        self.metrics.as_ref().map(|render| render())
    }

    pub(crate) fn observe_tool(&self, name: &str, outcome: ToolOutcome) {
        if let Some(observer) = &self.observer {
            observer(name, outcome);
        }
    }

    // A poisoned table only means a registration panicked; the data is still usable.
    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn list_tools(&self) -> Vec<Tool> {
        self.read().tools.iter().map(|entry| entry.tool.clone()).collect()
    }

    pub fn list_resources(&self) -> Vec<Resource> {
        self.read()
            .resources
            .values()
            .map(|entry| entry.resource.clone())
            .collect()
    }

    pub fn list_resource_templates(&self) -> Vec<ResourceTemplate> {
        self.read()
            .templates
            .values()
            .map(|entry| entry.template.clone())
            .collect()
    }

    pub fn list_prompts(&self) -> Vec<Prompt> {
        self.read()
            .prompts
            .iter()
            .map(|entry| entry.prompt.clone())
            .collect()
    }

    pub fn tool(&self, name: &str) -> Option<ToolEntry> {
        self.read()
            .tools
            .iter()
            .find(|entry| entry.tool.name == name)
            .cloned()
    }

    pub fn prompt(&self, name: &str) -> Option<PromptEntry> {
        self.read()
            .prompts
            .iter()
            .find(|entry| entry.prompt.name == name)
            .cloned()
    }

    /// Exact resource URI first, then the first template that matches.
    pub fn resource_handler_for(&self, uri: &str) -> Option<ResourceHandler> {
        let tables = self.read();
        if let Some(entry) = tables.resources.get(uri) {
            return Some(Arc::clone(&entry.handler));
        }
        tables
            .templates
            .values()
            .find(|entry| entry.template.match_uri(uri).is_some())
            .map(|entry| Arc::clone(&entry.handler))
    }

    pub fn notification_handler(&self, method: &str) -> Option<NotificationHandler> {
        self.read().notifications.get(method).cloned()
    }

    pub fn tool_count(&self) -> usize {
        self.read().tools.len()
    }

    /// Counts a tool call as running until the returned guard drops.
    pub(crate) fn begin_call(&self) -> InflightGuard<'_> {
        self.inflight.fetch_add(1, Ordering::SeqCst);
        InflightGuard { endpoint: self }
    }

    /// Tool calls currently running.
    pub fn inflight_count(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }
}

pub(crate) struct InflightGuard<'a> {
    endpoint: &'a McpEndpoint,
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.endpoint.inflight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for McpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.read();
        f.debug_struct("McpEndpoint")
            .field("name", &self.info.name)
            .field("tools", &tables.tools.len())
            .field("resources", &tables.resources.len())
            .field("templates", &tables.templates.len())
            .field("prompts", &tables.prompts.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolEndpoint for McpEndpoint {
    fn add_resource(&self, resource: Resource, handler: ResourceHandler) {
        debug!(uri = %resource.uri, "resource added");
        self.write()
            .resources
            .insert(resource.uri.clone(), ResourceEntry { resource, handler });
    }

    fn add_resource_template(&self, template: ResourceTemplate, handler: ResourceTemplateHandler) {
        debug!(template = %template.uri_template, "resource template added");
        self.write().templates.insert(
            template.uri_template.clone(),
            ResourceTemplateEntry { template, handler },
        );
    }

    fn add_tools(&self, tools: Vec<ToolEntry>) {
        let mut tables = self.write();
        for entry in tools {
            debug!(tool = %entry.tool.name, "tool added");
            match tables
                .tools
                .iter_mut()
                .find(|existing| existing.tool.name == entry.tool.name)
            {
                Some(existing) => *existing = entry,
                None => tables.tools.push(entry),
            }
        }
    }

    fn add_notification_handler(&self, method: &str, handler: NotificationHandler) {
        debug!(method = method, "notification handler added");
        self.write()
            .notifications
            .insert(method.to_string(), handler);
    }

    fn add_prompt(&self, prompt: Prompt, handler: PromptHandler) {
        debug!(prompt = %prompt.name, "prompt added");
        let mut tables = self.write();
        let entry = PromptEntry { prompt, handler };
        match tables
            .prompts
            .iter_mut()
            .find(|existing| existing.prompt.name == entry.prompt.name)
        {
            Some(existing) => *existing = entry,
            None => tables.prompts.push(entry),
        }
    }
}
