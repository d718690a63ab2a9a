use crate::features::command_provider::service::CommandProviderService;
use crate::required_str;
use capmux_core::{CapabilitySet, CoreError, Result};
use capmux_proto::{
    prompt, prompt_handler, tool, tool_error, tool_handler, tool_text, user_prompt,
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, HandlerResult,
    RequestContext, ToolSchema,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const EXECUTE_COMMAND_TOOL: &str = "execute_command";
pub const COMMAND_PROMPT: &str = "command_prompt";

pub struct CommandProviderController {
    service: CommandProviderService,
    prompt: String,
    /// Cancelled by the provider's `close`.
    inflight: CancellationToken,
}

impl CommandProviderController {
    pub fn new(service: CommandProviderService, prompt: String, inflight: CancellationToken) -> Self {
        Self {
            service,
            prompt,
            inflight,
        }
    }

    pub fn register(self: &Arc<Self>, caps: &CapabilitySet) -> Result<()> {
        let allowed = self.service.allowed_commands().join(", ");
        let execute = tool(
            EXECUTE_COMMAND_TOOL,
            format!(
                "Execute a shell command on the host and return its output. Allowed programs: {allowed}"
            ),
        )
        .with_string_param("command", "The command line to execute", true);

        let controller = Arc::clone(self);
        caps.add_tool(
            execute,
            tool_handler(move |ctx, params| {
                let controller = Arc::clone(&controller);
                async move { controller.handle_execute(ctx, params).await }
            }),
        )?;

        let controller = Arc::clone(self);
        caps.add_prompt(
            prompt(COMMAND_PROMPT, "Guidance for running shell commands safely"),
            prompt_handler(move |_ctx, params| {
                let controller = Arc::clone(&controller);
                async move { controller.handle_prompt(params) }
            }),
        )?;

        Ok(())
    }

    pub async fn handle_execute(
        &self,
        ctx: RequestContext,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let command = required_str(&params, "command")?;

        let outcome = tokio::select! {
            outcome = self.service.execute(command, self.inflight.clone()) => outcome,
            _ = ctx.cancel.cancelled() => Err(CoreError::Cancelled(format!("command '{command}'"))),
        };

        match outcome {
            Ok(output) if output.success() => {
                info!(command = command, "command finished");
                Ok(tool_text(output.combined()))
            }
            Ok(output) => {
                let status = output
                    .status
                    .map(|code| code.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                warn!(command = command, status = %status, "command failed");
                Ok(tool_error(format!(
                    "command exited with status {status}:\n{}",
                    output.combined()
                )))
            }
            Err(err) => {
                warn!(command = command, error = %err, "command rejected or aborted");
                Ok(tool_error(err.to_string()))
            }
        }
    }

    pub fn handle_prompt(&self, _params: GetPromptParams) -> HandlerResult<GetPromptResult> {
        Ok(user_prompt(
            Some("Command execution guidance".to_string()),
            self.prompt.clone(),
        ))
    }
}
