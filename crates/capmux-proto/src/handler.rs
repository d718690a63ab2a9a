use crate::protocol::{
    CallToolParams, CallToolResult, ErrorData, GetPromptParams, GetPromptResult, Prompt,
    ReadResourceParams, RequestId, Resource, ResourceContents, ResourceTemplate, Tool,
};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Per-call context handed to every handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Option<RequestId>,
    pub cancel: CancellationToken,
}

impl RequestContext {
    pub fn new(request_id: Option<RequestId>, cancel: CancellationToken) -> Self {
        Self { request_id, cancel }
    }

    pub fn detached() -> Self {
        Self::new(None, CancellationToken::new())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum HandlerError {
    #[error("Invalid params: {0}")]
    InvalidParams(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Request cancelled")]
    Cancelled,
}

impl From<HandlerError> for ErrorData {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::InvalidParams(msg) => ErrorData::invalid_params(msg, None),
            HandlerError::NotFound(msg) => ErrorData::resource_not_found(msg, None),
            HandlerError::Internal(msg) => ErrorData::internal_error(msg, None),
            HandlerError::Cancelled => ErrorData::internal_error("Request cancelled", None),
        }
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

pub type ToolHandler = Arc<
    dyn Fn(RequestContext, CallToolParams) -> BoxFuture<'static, HandlerResult<CallToolResult>>
        + Send
        + Sync,
>;

pub type ResourceHandler = Arc<
    dyn Fn(RequestContext, ReadResourceParams) -> BoxFuture<'static, HandlerResult<Vec<ResourceContents>>>
        + Send
        + Sync,
>;

// Templates share the resource handler shape; the handler resolves the URI itself.
pub type ResourceTemplateHandler = ResourceHandler;

pub type PromptHandler = Arc<
    dyn Fn(RequestContext, GetPromptParams) -> BoxFuture<'static, HandlerResult<GetPromptResult>>
        + Send
        + Sync,
>;

pub type NotificationHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

pub fn tool_handler<F, Fut>(f: F) -> ToolHandler
where
    F: Fn(RequestContext, CallToolParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<CallToolResult>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

pub fn resource_handler<F, Fut>(f: F) -> ResourceHandler
where
    F: Fn(RequestContext, ReadResourceParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<Vec<ResourceContents>>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

pub fn prompt_handler<F, Fut>(f: F) -> PromptHandler
where
    F: Fn(RequestContext, GetPromptParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult<GetPromptResult>> + Send + 'static,
{
    Arc::new(move |ctx, params| Box::pin(f(ctx, params)))
}

pub fn notification_handler<F, Fut>(f: F) -> NotificationHandler
where
    F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

#[derive(Clone)]
pub struct ToolEntry {
    pub tool: Tool,
    pub handler: ToolHandler,
}

impl fmt::Debug for ToolEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolEntry")
            .field("name", &self.tool.name)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ResourceEntry {
    pub resource: Resource,
    pub handler: ResourceHandler,
}

impl fmt::Debug for ResourceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceEntry")
            .field("uri", &self.resource.uri)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct ResourceTemplateEntry {
    pub template: ResourceTemplate,
    pub handler: ResourceTemplateHandler,
}

impl fmt::Debug for ResourceTemplateEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceTemplateEntry")
            .field("uri_template", &self.template.uri_template)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct PromptEntry {
    pub prompt: Prompt,
    pub handler: PromptHandler,
}

impl fmt::Debug for PromptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PromptEntry")
            .field("name", &self.prompt.name)
            .finish_non_exhaustive()
    }
}
