use crate::endpoint::{McpEndpoint, ToolOutcome};
use capmux_proto::{
    CallToolParams, CallToolResult, ErrorData, GetPromptParams, GetPromptResult,
    ProtocolVersion, ReadResourceParams, ReadResourceResult, RequestContext, ServerCapabilities,
    ServerInfo, ToolResultExt,
};
use rmcp::model::{
    CancelledNotificationParam, CustomNotification, ListPromptsResult,
    ListResourceTemplatesResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
};
use rmcp::service::{NotificationContext, RequestContext as PeerContext};
use rmcp::{RoleServer, ServerHandler};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

type DispatchResult<T> = std::result::Result<T, ErrorData>;

impl McpEndpoint {
    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::LATEST,
            capabilities: ServerCapabilities::builder()
                .enable_logging()
                .enable_prompts()
                .enable_resources()
                .enable_tools()
                .build(),
            server_info: self.info().clone(),
            instructions: self.instructions().map(str::to_string),
        }
    }

    /// Runs a tool. A missing tool or a handler error is a protocol error;
    /// a tool that ran and failed reports it through `isError`.
    pub async fn call_tool(
        &self,
        params: CallToolParams,
        ctx: RequestContext,
    ) -> DispatchResult<CallToolResult> {
        let name = params.name.to_string();
        let Some(entry) = self.tool(&name) else {
            self.observe_tool(&name, ToolOutcome::Failed);
            return Err(ErrorData::invalid_params(format!("Tool not found: {name}"), None));
        };

        let _running = self.begin_call();
        match (entry.handler)(ctx, params).await {
            Ok(result) => {
                let outcome = if result.failed() {
                    ToolOutcome::ToolError
                } else {
                    ToolOutcome::Success
                };
                self.observe_tool(&name, outcome);
                Ok(result)
            }
            Err(err) => {
                warn!(tool = %name, error = %err, "tool handler failed");
                self.observe_tool(&name, ToolOutcome::Failed);
                Err(err.into())
            }
        }
    }

    pub async fn read_resource(
        &self,
        params: ReadResourceParams,
        ctx: RequestContext,
    ) -> DispatchResult<ReadResourceResult> {
        let handler = self.resource_handler_for(&params.uri).ok_or_else(|| {
            ErrorData::resource_not_found(format!("Resource not found: {}", params.uri), None)
        })?;
        let contents = handler(ctx, params).await.map_err(ErrorData::from)?;
        Ok(ReadResourceResult { contents })
    }

    pub async fn get_prompt(
        &self,
        params: GetPromptParams,
        ctx: RequestContext,
    ) -> DispatchResult<GetPromptResult> {
        let entry = self.prompt(&params.name).ok_or_else(|| {
            ErrorData::invalid_params(format!("Prompt not found: {}", params.name), None)
        })?;
        (entry.handler)(ctx, params).await.map_err(ErrorData::from)
    }

    /// Delivers a notification to its registered handler, if any.
    pub async fn notify(&self, method: &str, params: Option<Value>) {
        match self.notification_handler(method) {
            Some(handler) => handler(params).await,
            None => debug!(method = method, "unhandled notification"),
        }
    }
}

/// The rmcp server handler every transport session runs. Cheap to clone;
/// all sessions share one endpoint.
#[derive(Debug, Clone)]
pub struct McpService {
    endpoint: Arc<McpEndpoint>,
}

impl McpService {
    pub fn new(endpoint: Arc<McpEndpoint>) -> Self {
        Self { endpoint }
    }

    pub fn endpoint(&self) -> &Arc<McpEndpoint> {
        &self.endpoint
    }
}

// The rmcp token is cancelled by `notifications/cancelled` and when the
// session stops, so handlers only ever watch one token.
fn handler_context(context: &PeerContext<RoleServer>) -> RequestContext {
    RequestContext::new(Some(context.id.clone()), context.ct.clone())
}

impl ServerHandler for McpService {
    fn get_info(&self) -> ServerInfo {
        self.endpoint.server_info()
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<ListToolsResult>> + Send + '_ {
        std::future::ready(Ok(ListToolsResult::with_all_items(self.endpoint.list_tools())))
    }

    fn call_tool(
        &self,
        request: CallToolParams,
        context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<CallToolResult>> + Send + '_ {
        let ctx = handler_context(&context);
        debug!(id = %context.id, tool = %request.name, "tools/call");
        self.endpoint.call_tool(request, ctx)
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<ListResourcesResult>> + Send + '_ {
        std::future::ready(Ok(ListResourcesResult::with_all_items(
            self.endpoint.list_resources(),
        )))
    }

    fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<ListResourceTemplatesResult>> + Send + '_ {
        std::future::ready(Ok(ListResourceTemplatesResult::with_all_items(
            self.endpoint.list_resource_templates(),
        )))
    }

    fn read_resource(
        &self,
        request: ReadResourceParams,
        context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<ReadResourceResult>> + Send + '_ {
        let ctx = handler_context(&context);
        self.endpoint.read_resource(request, ctx)
    }

    fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<ListPromptsResult>> + Send + '_ {
        std::future::ready(Ok(ListPromptsResult::with_all_items(
            self.endpoint.list_prompts(),
        )))
    }

    fn get_prompt(
        &self,
        request: GetPromptParams,
        context: PeerContext<RoleServer>,
    ) -> impl Future<Output = DispatchResult<GetPromptResult>> + Send + '_ {
        let ctx = handler_context(&context);
        self.endpoint.get_prompt(request, ctx)
    }

    fn on_initialized(
        &self,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        debug!("client initialized");
        std::future::ready(())
    }

    fn on_cancelled(
        &self,
        notification: CancelledNotificationParam,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        debug!(
            id = %notification.request_id,
            reason = notification.reason.as_deref().unwrap_or(""),
            "cancel requested"
        );
        std::future::ready(())
    }

    fn on_custom_notification(
        &self,
        notification: CustomNotification,
        _context: NotificationContext<RoleServer>,
    ) -> impl Future<Output = ()> + Send + '_ {
        async move {
            self.endpoint
                .notify(&notification.method, notification.params)
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmux_proto::{
        call_params, notification_handler, prompt, prompt_handler, resource, resource_handler,
        resource_template, text_contents, tool, tool_handler, tool_text, user_prompt, ErrorCode,
        HandlerError, ProtocolEndpoint, ToolArgs, ToolEntry, ToolSchema,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    fn endpoint() -> McpEndpoint {
        let endpoint = McpEndpoint::new("capmux", "1.2.3").with_instructions("be nice");
        endpoint.add_tools(vec![
            ToolEntry {
                tool: tool("echo", "Echo").with_string_param("text", "Text", true),
                handler: tool_handler(|_ctx, params: CallToolParams| async move {
                    match params.str_arg("text") {
                        Some(text) => Ok(tool_text(text)),
                        None => Err(HandlerError::InvalidParams("text".to_string())),
                    }
                }),
            },
            ToolEntry {
                tool: tool("wait", "Waits for cancellation"),
                handler: tool_handler(|ctx, _params| async move {
                    ctx.cancel.cancelled().await;
                    Err(HandlerError::Cancelled)
                }),
            },
        ]);
        endpoint.add_resource(
            resource("mem://fixed", "Fixed"),
            resource_handler(|_ctx, params| async move {
                Ok(vec![text_contents(params.uri, None, "fixed")])
            }),
        );
        endpoint.add_resource_template(
            resource_template("mem://{key}", "Keyed"),
            resource_handler(|_ctx, params| async move {
                Ok(vec![text_contents(params.uri, None, "templated")])
            }),
        );
        endpoint.add_prompt(
            prompt("greet", "Greeting"),
            prompt_handler(|_ctx, _params| async move { Ok(user_prompt(None, "hello")) }),
        );
        endpoint
    }

    fn ctx() -> RequestContext {
        RequestContext::detached()
    }

    #[test]
    fn test_server_info_reports_identity_and_capabilities() {
        let info = endpoint().server_info();
        let value = serde_json::to_value(&info).unwrap();

        assert_eq!(value["serverInfo"]["name"], "capmux");
        assert_eq!(value["serverInfo"]["version"], "1.2.3");
        assert_eq!(value["instructions"], "be nice");
        assert!(value["capabilities"]["tools"].is_object());
        assert!(value["capabilities"]["resources"].is_object());
        assert!(value["capabilities"]["prompts"].is_object());
    }

    #[tokio::test]
    async fn test_tool_call_and_observer() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&seen);
        let endpoint = endpoint().with_tool_observer(Arc::new(move |name, outcome| {
            recorder.lock().unwrap().push((name.to_string(), outcome));
        }));

        let ok = endpoint
            .call_tool(call_params("echo", json!({ "text": "hi" })), ctx())
            .await
            .unwrap();
        assert_eq!(ok, tool_text("hi"));

        let bad = endpoint
            .call_tool(call_params("echo", json!({})), ctx())
            .await
            .unwrap_err();
        assert_eq!(bad.code, ErrorCode::INVALID_PARAMS);

        let missing = endpoint
            .call_tool(call_params("nope", json!({})), ctx())
            .await
            .unwrap_err();
        assert_eq!(missing.code, ErrorCode::INVALID_PARAMS);

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ("echo".to_string(), ToolOutcome::Success),
                ("echo".to_string(), ToolOutcome::Failed),
                ("nope".to_string(), ToolOutcome::Failed),
            ]
        );
        assert_eq!(endpoint.inflight_count(), 0);
    }

    #[tokio::test]
    async fn test_resource_read_prefers_exact_uri() {
        let endpoint = endpoint();
        let read = |uri: &str| ReadResourceParams {
            uri: uri.to_string(),
        };

        let exact = endpoint.read_resource(read("mem://fixed"), ctx()).await.unwrap();
        let templated = endpoint.read_resource(read("mem://other"), ctx()).await.unwrap();
        let missing = endpoint.read_resource(read("disk://x"), ctx()).await.unwrap_err();

        assert_eq!(exact.contents, vec![text_contents("mem://fixed", None, "fixed")]);
        assert_eq!(
            templated.contents,
            vec![text_contents("mem://other", None, "templated")]
        );
        assert_eq!(missing.code, ErrorCode::RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_prompt_get() {
        let endpoint = endpoint();
        let get = |name: &str| GetPromptParams {
            name: name.to_string(),
            arguments: None,
        };

        let found = endpoint.get_prompt(get("greet"), ctx()).await.unwrap();
        let missing = endpoint.get_prompt(get("absent"), ctx()).await.unwrap_err();

        assert_eq!(found, user_prompt(None, "hello"));
        assert_eq!(missing.code, ErrorCode::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_notifications_reach_registered_handler() {
        let endpoint = endpoint();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        endpoint.add_notification_handler(
            "notifications/custom",
            notification_handler(move |_params| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }),
        );

        endpoint.notify("notifications/custom", Some(json!({}))).await;
        endpoint.notify("notifications/unknown", None).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_token_reaches_handler() {
        let endpoint = endpoint();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = endpoint
            .call_tool(
                call_params("wait", json!({})),
                RequestContext::new(None, cancel),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(endpoint.inflight_count(), 0);
    }
}
