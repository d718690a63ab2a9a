use crate::features::browser_provider::service::{
    BrowserAction, BrowserProviderService, Breakpoint, ScreenshotRequest,
};
use crate::{required_str, tool_outcome};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use capmux_core::{CapabilitySet, CoreError, Result};
use capmux_proto::{
    prompt, prompt_handler, tool, tool_error, tool_handler, user_prompt, CallToolParams,
    CallToolResult, Content, GetPromptParams, GetPromptResult, HandlerError, HandlerResult,
    RequestContext, Tool, ToolArgs, ToolSchema,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub const NAVIGATE_TOOL: &str = "browser_navigate";
pub const SCREENSHOT_TOOL: &str = "browser_screenshot";
pub const CLICK_TOOL: &str = "browser_click";
pub const FILL_TOOL: &str = "browser_fill";
pub const SELECT_TOOL: &str = "browser_select";
pub const HOVER_TOOL: &str = "browser_hover";
pub const EVALUATE_TOOL: &str = "browser_evaluate";
pub const DEBUG_ENABLE_TOOL: &str = "browser_debug_enable";
pub const SET_BREAKPOINT_TOOL: &str = "browser_set_breakpoint";
pub const REMOVE_BREAKPOINT_TOOL: &str = "browser_remove_breakpoint";
pub const PAUSE_TOOL: &str = "browser_pause";
pub const RESUME_TOOL: &str = "browser_resume";
pub const CALLSTACK_TOOL: &str = "browser_get_callstack";
pub const BROWSER_PROMPT: &str = "browser_prompt";

fn descriptors() -> Vec<Tool> {
    vec![
        tool(NAVIGATE_TOOL, "Navigate the browser page to a URL")
            .with_string_param("url", "URL to navigate to (http, https, file or about)", true),
        tool(
            SCREENSHOT_TOOL,
            "Take a screenshot of the current page or a specific element",
        )
        .with_string_param("name", "Name for the screenshot file", true)
        .with_string_param("selector", "CSS selector for the element to capture", false)
        .with_number_param("width", "Viewport width in pixels (default 1280)", false)
        .with_number_param("height", "Viewport height in pixels (default 800)", false),
        tool(CLICK_TOOL, "Click an element on the page")
            .with_string_param("selector", "CSS selector for the element to click", true),
        tool(FILL_TOOL, "Fill out an input field")
            .with_string_param("selector", "CSS selector for the input field", true)
            .with_string_param("value", "Value to type", true),
        tool(SELECT_TOOL, "Choose an option of a select element")
            .with_string_param("selector", "CSS selector for the select element", true)
            .with_string_param("value", "Option value to select", true),
        tool(HOVER_TOOL, "Hover over an element on the page")
            .with_string_param("selector", "CSS selector for the element to hover", true),
        tool(EVALUATE_TOOL, "Execute JavaScript in the page and return the result")
            .with_string_param("script", "JavaScript code to execute", true),
        tool(DEBUG_ENABLE_TOOL, "Enable or disable JavaScript debugging")
            .with_bool_param("enabled", "Whether debugging should be on", true),
        tool(SET_BREAKPOINT_TOOL, "Set a JavaScript breakpoint")
            .with_string_param("url", "URL of the script", true)
            .with_number_param("line", "Line number, starting at 1", true)
            .with_number_param("column", "Column number, starting at 1", false)
            .with_string_param("condition", "Only break when this expression is true", false),
        tool(REMOVE_BREAKPOINT_TOOL, "Remove a JavaScript breakpoint")
            .with_string_param("breakpointId", "Breakpoint id returned when it was set", true),
        tool(PAUSE_TOOL, "Pause JavaScript execution"),
        tool(RESUME_TOOL, "Resume JavaScript execution"),
        tool(CALLSTACK_TOOL, "Get the call stack while execution is paused"),
    ]
}

/// Maps tool arguments onto a browser action. Missing or malformed
/// arguments are protocol errors, not tool failures.
fn action(tool: &str, params: &CallToolParams) -> HandlerResult<BrowserAction> {
    let selector = || required_str(params, "selector").map(str::to_string);
    let value = || {
        params
            .str_arg("value")
            .map(str::to_string)
            .ok_or_else(|| HandlerError::InvalidParams("missing 'value' parameter".to_string()))
    };

    Ok(match tool {
        NAVIGATE_TOOL => BrowserAction::Navigate {
            url: required_str(params, "url")?.to_string(),
        },
        CLICK_TOOL => BrowserAction::Click {
            selector: selector()?,
        },
        FILL_TOOL => BrowserAction::Fill {
            selector: selector()?,
            value: value()?,
        },
        SELECT_TOOL => BrowserAction::Select {
            selector: selector()?,
            value: value()?,
        },
        HOVER_TOOL => BrowserAction::Hover {
            selector: selector()?,
        },
        EVALUATE_TOOL => BrowserAction::Evaluate {
            script: required_str(params, "script")?.to_string(),
        },
        DEBUG_ENABLE_TOOL => BrowserAction::Debugging {
            enabled: params.bool_arg("enabled").ok_or_else(|| {
                HandlerError::InvalidParams("'enabled' must be a boolean".to_string())
            })?,
        },
        SET_BREAKPOINT_TOOL => BrowserAction::SetBreakpoint(Breakpoint {
            url: required_str(params, "url")?.to_string(),
            line: params.u64_arg("line").filter(|line| *line > 0).ok_or_else(|| {
                HandlerError::InvalidParams("'line' must be a positive integer".to_string())
            })?,
            column: params.u64_arg("column"),
            condition: params
                .str_arg("condition")
                .filter(|condition| !condition.trim().is_empty())
                .map(str::to_string),
        }),
        REMOVE_BREAKPOINT_TOOL => BrowserAction::RemoveBreakpoint {
            id: required_str(params, "breakpointId")?.to_string(),
        },
        PAUSE_TOOL => BrowserAction::Pause,
        RESUME_TOOL => BrowserAction::Resume,
        CALLSTACK_TOOL => BrowserAction::CallStack,
        other => {
            return Err(HandlerError::InvalidParams(format!(
                "unknown browser tool '{other}'"
            )))
        }
    })
}

pub struct BrowserProviderController {
    service: BrowserProviderService,
    prompt: String,
    call_timeout: Duration,
    /// Cancelled by the provider's `close`.
    inflight: CancellationToken,
}

impl BrowserProviderController {
    pub fn new(
        service: BrowserProviderService,
        prompt: String,
        call_timeout: Duration,
        inflight: CancellationToken,
    ) -> Self {
        Self {
            service,
            prompt,
            call_timeout,
            inflight,
        }
    }

    pub fn register(self: &Arc<Self>, caps: &CapabilitySet) -> Result<()> {
        for descriptor in descriptors() {
            let name = descriptor.name.to_string();
            let controller = Arc::clone(self);
            caps.add_tool(
                descriptor,
                tool_handler(move |ctx, params| {
                    let controller = Arc::clone(&controller);
                    let name = name.clone();
                    async move { controller.handle(&name, ctx, params).await }
                }),
            )?;
        }

        let controller = Arc::clone(self);
        caps.add_prompt(
            prompt(
                BROWSER_PROMPT,
                "Get the functions and guidance of the Browser provider",
            ),
            prompt_handler(move |_ctx, params| {
                let controller = Arc::clone(&controller);
                async move { controller.handle_prompt(params) }
            }),
        )?;

        Ok(())
    }

    pub async fn shutdown(&self) {
        self.service.shutdown().await;
    }

    /// Runs `work` under the call timeout, the request cancel and `close`.
    async fn bounded<T>(
        &self,
        ctx: &RequestContext,
        tool: &str,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        tokio::select! {
            outcome = tokio::time::timeout(self.call_timeout, work) => outcome.unwrap_or_else(|_| {
                Err(CoreError::Timeout(format!(
                    "{tool} exceeded {}s",
                    self.call_timeout.as_secs()
                )))
            }),
            _ = ctx.cancel.cancelled() => Err(CoreError::Cancelled(tool.to_string())),
            _ = self.inflight.cancelled() => Err(CoreError::Cancelled(format!("{tool}: browser provider closed"))),
        }
    }

    pub async fn handle(
        &self,
        tool: &str,
        ctx: RequestContext,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        if tool == SCREENSHOT_TOOL {
            return self.handle_screenshot(ctx, params).await;
        }

        let action = action(tool, &params)?;
        let outcome = self.bounded(&ctx, tool, self.service.perform(action)).await;
        if let Err(err) = &outcome {
            warn!(tool = tool, error = %err, "browser tool failed");
        }
        tool_outcome(outcome)
    }

    async fn handle_screenshot(
        &self,
        ctx: RequestContext,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let request = ScreenshotRequest {
            name: required_str(&params, "name")?.to_string(),
            selector: params
                .str_arg("selector")
                .filter(|selector| !selector.trim().is_empty())
                .map(str::to_string),
            width: params.u64_arg("width").filter(|w| *w > 0),
            height: params.u64_arg("height").filter(|h| *h > 0),
        };

        match self
            .bounded(&ctx, SCREENSHOT_TOOL, self.service.screenshot(&request))
            .await
        {
            Ok(shot) => Ok(CallToolResult::success(vec![
                Content::text(format!("Screenshot saved to {}", shot.path.display())),
                Content::image(STANDARD.encode(&shot.png), "image/png"),
            ])),
            Err(err) => {
                warn!(name = %request.name, error = %err, "screenshot failed");
                Ok(tool_error(err.to_string()))
            }
        }
    }

    pub fn handle_prompt(&self, _params: GetPromptParams) -> HandlerResult<GetPromptResult> {
        Ok(user_prompt(
            Some("Browser guidance".to_string()),
            self.prompt.clone(),
        ))
    }
}
