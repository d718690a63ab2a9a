use crate::provider::CapabilityProvider;
use capmux_proto::ProtocolEndpoint;
use serde::Serialize;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AdaptedCounts {
    pub resources: usize,
    pub resource_templates: usize,
    pub tools: usize,
    pub notification_handlers: usize,
    pub prompts: usize,
}

/// Copies the provider's capabilities into `endpoint`, then freezes them.
///
/// The copy is one-shot: later changes on the provider are rejected rather
/// than silently missing from the endpoint.
pub fn load_service(
    provider: &dyn CapabilityProvider,
    endpoint: &dyn ProtocolEndpoint,
) -> AdaptedCounts {
    let mut counts = AdaptedCounts::default();

    for entry in provider.resources() {
        endpoint.add_resource(entry.resource, entry.handler);
        counts.resources += 1;
    }

    for entry in provider.resource_templates() {
        endpoint.add_resource_template(entry.template, entry.handler);
        counts.resource_templates += 1;
    }

    let tools = provider.tools();
    counts.tools = tools.len();
    endpoint.add_tools(tools);

    for (method, handler) in provider.notification_handlers() {
        endpoint.add_notification_handler(&method, handler);
        counts.notification_handlers += 1;
    }

    for entry in provider.prompts() {
        endpoint.add_prompt(entry.prompt, entry.handler);
        counts.prompts += 1;
    }

    provider.capabilities().freeze();

    debug!(
        provider = provider.name(),
        resources = counts.resources,
        resource_templates = counts.resource_templates,
        tools = counts.tools,
        notification_handlers = counts.notification_handlers,
        prompts = counts.prompts,
        "provider capabilities adapted"
    );

    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::CapabilitySet;
    use crate::config::HostConfig;
    use crate::provider::ProviderContext;
    use crate::{CoreError, Result};
    use async_trait::async_trait;
    use capmux_proto::*;
    use serde_json::{Map, Value};
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    #[derive(Default)]
    struct RecordingEndpoint {
        calls: Mutex<Vec<String>>,
    }

    impl RecordingEndpoint {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProtocolEndpoint for RecordingEndpoint {
        fn add_resource(&self, resource: Resource, _handler: ResourceHandler) {
            self.record(format!("resource:{}", resource.uri));
        }

        fn add_resource_template(&self, template: ResourceTemplate, _handler: ResourceTemplateHandler) {
            self.record(format!("template:{}", template.uri_template));
        }

        fn add_tools(&self, tools: Vec<ToolEntry>) {
            for entry in tools {
                self.record(format!("tool:{}", entry.tool.name));
            }
        }

        fn add_notification_handler(&self, method: &str, _handler: NotificationHandler) {
            self.record(format!("notification:{method}"));
        }

        fn add_prompt(&self, prompt: Prompt, _handler: PromptHandler) {
            self.record(format!("prompt:{}", prompt.name));
        }
    }

    struct StaticProvider {
        ctx: ProviderContext,
        caps: CapabilitySet,
    }

    impl StaticProvider {
        fn new() -> Self {
            let ctx = ProviderContext::new(
                "Static",
                Arc::new(HostConfig::default()),
                CancellationToken::new(),
            );
            Self {
                ctx,
                caps: CapabilitySet::new("Static"),
            }
        }
    }

    #[async_trait]
    impl CapabilityProvider for StaticProvider {
        fn name(&self) -> &'static str {
            "Static"
        }

        fn context(&self) -> &ProviderContext {
            &self.ctx
        }

        fn capabilities(&self) -> &CapabilitySet {
            &self.caps
        }

        fn config(&self) -> String {
            "{}".to_string()
        }

        fn load_config(&mut self, _section: &Map<String, Value>) -> Result<()> {
            Ok(())
        }

        async fn init(&mut self) -> Result<()> {
            self.caps.add_prompt(
                prompt("static_prompt", "prompt"),
                prompt_handler(|_ctx, _p| async { Ok(user_prompt(None, "x")) }),
            )?;
            self.caps.add_tool(
                tool("static_tool", "tool"),
                tool_handler(|_ctx, _p| async { Ok(tool_text("x")) }),
            )?;
            self.caps.add_notification_handler(
                "notifications/static",
                notification_handler(|_| async {}),
            )?;
            self.caps.add_resource_template(
                resource_template("static://{id}", "static"),
                resource_handler(|_ctx, _p| async { Ok(Vec::new()) }),
            )?;
            self.caps.add_resource(
                resource("static://root", "root"),
                resource_handler(|_ctx, _p| async { Ok(Vec::new()) }),
            )?;
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_load_service_copies_in_fixed_order() {
        let mut provider = StaticProvider::new();
        provider.init().await.unwrap();
        let endpoint = RecordingEndpoint::default();

        let counts = load_service(&provider, &endpoint);

        assert_eq!(
            endpoint.calls(),
            vec![
                "resource:static://root",
                "template:static://{id}",
                "tool:static_tool",
                "notification:notifications/static",
                "prompt:static_prompt",
            ]
        );
        assert_eq!(counts.tools, 1);
        assert_eq!(counts.prompts, 1);
    }

    #[tokio::test]
    async fn test_adds_after_load_service_are_rejected_and_invisible() {
        let mut provider = StaticProvider::new();
        provider.init().await.unwrap();
        let endpoint = RecordingEndpoint::default();
        load_service(&provider, &endpoint);
        let before = endpoint.calls().len();

        let late = provider.capabilities().add_tool(
            tool("late_tool", "too late"),
            tool_handler(|_ctx, _p| async { Ok(tool_text("late")) }),
        );

        assert_eq!(late, Err(CoreError::CapabilitiesFrozen("Static".to_string())));
        assert_eq!(endpoint.calls().len(), before);
        assert!(provider.tools().iter().all(|t| t.tool.name != "late_tool"));
    }
}
