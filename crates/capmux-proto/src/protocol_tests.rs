#[cfg(test)]
mod tests {
    use crate::handler::*;
    use crate::protocol::*;
    use serde_json::json;

    #[test]
    fn test_tool_schema_builder() {
        let tool = tool("read_file", "Read a file")
            .with_string_param("path", "Path to read", true)
            .with_number_param("limit", "Max bytes", false);

        let schema = &tool.input_schema;
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["path"]["type"], "string");
        assert_eq!(schema["properties"]["limit"]["type"], "number");
        assert_eq!(schema["required"], json!(["path"]));
    }

    #[test]
    fn test_tool_serializes_camel_case_schema() {
        let value = serde_json::to_value(tool("noop", "Does nothing")).unwrap();

        assert_eq!(value["inputSchema"]["type"], "object");
        assert!(value.get("input_schema").is_none());
    }

    #[test]
    fn test_tool_error_sets_flag() {
        let failed = tool_error("boom");
        let value = serde_json::to_value(&failed).unwrap();

        assert!(failed.failed());
        assert!(!tool_text("fine").failed());
        assert_eq!(value["isError"], true);
        assert_eq!(value["content"][0]["type"], "text");
        assert_eq!(value["content"][0]["text"], "boom");
    }

    #[test]
    fn test_text_contents_skips_absent_mime_type() {
        let value = serde_json::to_value(text_contents("file:///tmp/a", None, "hello")).unwrap();

        assert_eq!(value, json!({ "uri": "file:///tmp/a", "text": "hello" }));
    }

    #[test]
    fn test_user_prompt_shape() {
        let result = user_prompt(Some("desc".to_string()), "be careful");
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["description"], "desc");
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"]["text"], "be careful");
    }

    #[test]
    fn test_described_resource_serialization() {
        let value = serde_json::to_value(
            resource("file://allowed-directories", "Allowed directories")
                .with_description("Directories the server may touch")
                .with_mime_type("text/plain"),
        )
        .unwrap();

        assert_eq!(value["uri"], "file://allowed-directories");
        assert_eq!(value["mimeType"], "text/plain");
        assert!(value.get("annotations").is_none());
    }

    #[test]
    fn test_template_matches_greedy_tail() {
        let template = resource_template("file://{path}", "file");
        let vars = template.match_uri("file:///tmp/a/b.txt").unwrap();

        assert_eq!(vars.get("path").map(String::as_str), Some("/tmp/a/b.txt"));
    }

    #[test]
    fn test_template_matches_multiple_variables() {
        let vars = match_uri_template("db://{table}/rows/{id}", "db://users/rows/42").unwrap();

        assert_eq!(vars.get("table").map(String::as_str), Some("users"));
        assert_eq!(vars.get("id").map(String::as_str), Some("42"));
    }

    #[test]
    fn test_template_rejects_other_scheme() {
        let template = resource_template("file://{path}", "file");
        assert!(template.match_uri("http://example.com").is_none());
        assert!(template.match_uri("file://").is_none());
    }

    #[test]
    fn test_call_params_accessors() {
        let params = call_params(
            "execute_command",
            json!({ "command": "ls", "timeout": 5, "headless": false }),
        );

        assert_eq!(params.str_arg("command"), Some("ls"));
        assert_eq!(params.u64_arg("timeout"), Some(5));
        assert_eq!(params.bool_arg("headless"), Some(false));
        assert_eq!(params.str_arg("missing"), None);
        assert_eq!(call_params("t", json!({ "line": 12.0 })).u64_arg("line"), Some(12));
        assert_eq!(call_params("t", json!({ "line": 1.5 })).u64_arg("line"), None);
        assert_eq!(call_params("t", json!({ "line": -1 })).u64_arg("line"), None);
        assert!(call_params("t", json!("not an object")).arguments.is_none());
    }

    #[test]
    fn test_handler_error_maps_to_rpc_codes() {
        let invalid: ErrorData = HandlerError::InvalidParams("x".to_string()).into();
        let missing: ErrorData = HandlerError::NotFound("file://gone".to_string()).into();
        let internal: ErrorData = HandlerError::Internal("y".to_string()).into();

        assert_eq!(invalid.code, ErrorCode::INVALID_PARAMS);
        assert_eq!(missing.code, ErrorCode::RESOURCE_NOT_FOUND);
        assert_eq!(internal.code, ErrorCode::INTERNAL_ERROR);
        assert_eq!(internal.message, "y");
    }

    #[tokio::test]
    async fn test_tool_handler_helper_invokes_closure() {
        let handler = tool_handler(|_ctx, params: CallToolParams| async move {
            Ok(tool_text(format!("called {}", params.name)))
        });

        let result = handler(RequestContext::detached(), call_params("echo", json!({})))
            .await
            .unwrap();

        assert_eq!(result, tool_text("called echo"));
    }
}
