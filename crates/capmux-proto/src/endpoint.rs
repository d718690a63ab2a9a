use crate::handler::{
    NotificationHandler, PromptHandler, ResourceHandler, ResourceTemplateHandler, ToolEntry,
};
use crate::protocol::{Prompt, Resource, ResourceTemplate};

/// Registration surface of the shared protocol endpoint.
///
/// Adding a descriptor whose identity (URI, template, tool or prompt name,
/// notification method) is already present replaces the earlier entry.
pub trait ProtocolEndpoint: Send + Sync {
    fn add_resource(&self, resource: Resource, handler: ResourceHandler);
    fn add_resource_template(&self, template: ResourceTemplate, handler: ResourceTemplateHandler);
    fn add_tools(&self, tools: Vec<ToolEntry>);
    fn add_notification_handler(&self, method: &str, handler: NotificationHandler);
    fn add_prompt(&self, prompt: Prompt, handler: PromptHandler);
}
