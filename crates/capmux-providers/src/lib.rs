pub mod features;

pub use features::browser_provider::{BrowserConfig, BrowserProvider, BROWSER_PROVIDER_NAME};
pub use features::command_provider::{CommandConfig, CommandProvider, COMMAND_PROVIDER_NAME};
pub use features::filesystem_provider::{
    FileSystemConfig, FileSystemProvider, FILESYSTEM_PROVIDER_NAME,
};

use capmux_core::Result;
use capmux_proto::{
    tool_error, tool_text, CallToolParams, CallToolResult, HandlerError, HandlerResult, ToolArgs,
};

/// Tool failures become `isError` results so the caller sees the message
/// instead of a protocol error.
pub(crate) fn tool_outcome(result: Result<String>) -> HandlerResult<CallToolResult> {
    Ok(match result {
        Ok(text) => tool_text(text),
        Err(err) => tool_error(err.to_string()),
    })
}

pub(crate) fn required_str<'a>(
    params: &'a CallToolParams,
    key: &str,
) -> HandlerResult<&'a str> {
    params
        .str_arg(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| HandlerError::InvalidParams(format!("missing '{key}' parameter")))
}

/// Splits a comma separated list, trimming blanks.
pub(crate) fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use capmux_core::CoreError;
    use capmux_proto::{call_params, ToolResultExt};

    #[test]
    fn test_tool_outcome_maps_errors_to_error_results() {
        let ok = tool_outcome(Ok("done".to_string())).unwrap();
        let failed = tool_outcome(Err(CoreError::PermissionDenied("rm".to_string()))).unwrap();

        assert!(!ok.failed());
        assert!(failed.failed());
    }

    #[test]
    fn test_required_str_rejects_blank() {
        let params = call_params("t", serde_json::json!({ "path": "  " }));
        assert!(matches!(
            required_str(&params, "path"),
            Err(HandlerError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list(" ls, cat ,,git"), vec!["ls", "cat", "git"]);
        assert!(split_list("").is_empty());
    }
}
