use crate::features::filesystem_provider::service::FileSystemProviderService;
use crate::{required_str, tool_outcome};
use capmux_core::{CapabilitySet, Result};
use capmux_proto::{
    match_uri_template, prompt, prompt_handler, resource, resource_handler, resource_template,
    text_contents, tool, tool_handler, tool_text, user_prompt, CallToolParams, CallToolResult,
    Describe, GetPromptParams, GetPromptResult, HandlerError, HandlerResult, ReadResourceParams,
    RequestContext, ResourceContents, Tool, ToolArgs, ToolSchema,
};
use std::future::Future;
use std::sync::Arc;

pub const ALLOWED_DIRECTORIES_URI: &str = "file://allowed-directories";
pub const FILE_TEMPLATE: &str = "file://{path}";
pub const FILESYSTEM_PROMPT: &str = "filesystem_prompt";

pub struct FileSystemProviderController {
    service: FileSystemProviderService,
    prompt: String,
}

impl FileSystemProviderController {
    pub fn new(service: FileSystemProviderService, prompt: String) -> Self {
        Self { service, prompt }
    }

    pub fn register(self: &Arc<Self>, caps: &CapabilitySet) -> Result<()> {
        self.add_tool(
            caps,
            tool("read_file", "Read the complete contents of a file")
                .with_string_param("path", "Path of the file to read", true),
            |c, _ctx, p| async move { c.handle_read_file(p).await },
        )?;
        self.add_tool(
            caps,
            tool(
                "write_file",
                "Create a new file or overwrite an existing file with the given content",
            )
            .with_string_param("path", "Path of the file to write", true)
            .with_string_param("content", "Content to write", true),
            |c, _ctx, p| async move { c.handle_write_file(p).await },
        )?;
        self.add_tool(
            caps,
            tool("list_directory", "List files and directories at a path")
                .with_string_param("path", "Directory to list", true),
            |c, _ctx, p| async move { c.handle_list_directory(p).await },
        )?;
        self.add_tool(
            caps,
            tool(
                "create_directory",
                "Create a directory, including missing parents",
            )
            .with_string_param("path", "Directory to create", true),
            |c, _ctx, p| async move { c.handle_create_directory(p).await },
        )?;
        self.add_tool(
            caps,
            tool("move_file", "Move or rename a file or directory")
                .with_string_param("source", "Existing path", true)
                .with_string_param("destination", "New path; must not exist", true),
            |c, _ctx, p| async move { c.handle_move_file(p).await },
        )?;
        self.add_tool(
            caps,
            tool(
                "search_files",
                "Recursively search for files and directories whose name contains a pattern",
            )
            .with_string_param("path", "Directory to start from", true)
            .with_string_param("pattern", "Case-insensitive name fragment", true),
            |c, _ctx, p| async move { c.handle_search_files(p).await },
        )?;
        self.add_tool(
            caps,
            tool(
                "get_file_info",
                "Retrieve size, type, permissions and timestamps of a path",
            )
            .with_string_param("path", "Path to inspect", true),
            |c, _ctx, p| async move { c.handle_get_file_info(p).await },
        )?;
        self.add_tool(
            caps,
            tool(
                "list_allowed_directories",
                "List the directories this server is allowed to access",
            ),
            |c, _ctx, _p| async move {
                Ok::<_, HandlerError>(tool_text(c.service.list_allowed_directories()))
            },
        )?;

        let controller = Arc::clone(self);
        caps.add_resource(
            resource(ALLOWED_DIRECTORIES_URI, "Allowed directories")
                .with_description("Directories the filesystem tools may access")
                .with_mime_type("text/plain"),
            resource_handler(move |_ctx, params: ReadResourceParams| {
                let controller = Arc::clone(&controller);
                async move {
                    Ok(vec![text_contents(
                        params.uri,
                        Some("text/plain".to_string()),
                        controller.service.list_allowed_directories(),
                    )])
                }
            }),
        )?;

        let controller = Arc::clone(self);
        caps.add_resource_template(
            resource_template(FILE_TEMPLATE, "File")
                .with_description("Contents of a file inside an allowed directory")
                .with_mime_type("text/plain"),
            resource_handler(move |_ctx, params| {
                let controller = Arc::clone(&controller);
                async move { controller.handle_read_resource(params).await }
            }),
        )?;

        let controller = Arc::clone(self);
        caps.add_prompt(
            prompt(FILESYSTEM_PROMPT, "Guidance for working with local files"),
            prompt_handler(move |_ctx, params| {
                let controller = Arc::clone(&controller);
                async move { controller.handle_prompt(params) }
            }),
        )?;

        Ok(())
    }

    fn add_tool<F, Fut>(self: &Arc<Self>, caps: &CapabilitySet, tool: Tool, handler: F) -> Result<()>
    where
        F: Fn(Arc<Self>, RequestContext, CallToolParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<CallToolResult>> + Send + 'static,
    {
        let controller = Arc::clone(self);
        caps.add_tool(
            tool,
            tool_handler(move |ctx, params| handler(Arc::clone(&controller), ctx, params)),
        )
    }

    pub async fn handle_read_file(&self, params: CallToolParams) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        tool_outcome(self.service.read_file(path).await)
    }

    pub async fn handle_write_file(&self, params: CallToolParams) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        let content = params
            .str_arg("content")
            .ok_or_else(|| HandlerError::InvalidParams("missing 'content' parameter".to_string()))?;
        tool_outcome(self.service.write_file(path, content.to_string()).await)
    }

    pub async fn handle_list_directory(
        &self,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        tool_outcome(self.service.list_directory(path).await)
    }

    pub async fn handle_create_directory(
        &self,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        tool_outcome(self.service.create_directory(path).await)
    }

    pub async fn handle_move_file(&self, params: CallToolParams) -> HandlerResult<CallToolResult> {
        let source = required_str(&params, "source")?;
        let destination = required_str(&params, "destination")?;
        tool_outcome(self.service.move_file(source, destination).await)
    }

    pub async fn handle_search_files(
        &self,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        let pattern = required_str(&params, "pattern")?;
        let outcome = self.service.search_files(path, pattern).await.map(|found| {
            if found.is_empty() {
                "No matches found".to_string()
            } else {
                found
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
        });
        tool_outcome(outcome)
    }

    pub async fn handle_get_file_info(
        &self,
        params: CallToolParams,
    ) -> HandlerResult<CallToolResult> {
        let path = required_str(&params, "path")?;
        tool_outcome(self.service.get_file_info(path).await)
    }

    pub async fn handle_read_resource(
        &self,
        params: ReadResourceParams,
    ) -> HandlerResult<Vec<ResourceContents>> {
        let path = match_uri_template(FILE_TEMPLATE, &params.uri)
            .and_then(|mut vars| vars.remove("path"))
            .ok_or_else(|| HandlerError::InvalidParams(format!("unsupported uri {}", params.uri)))?;

        let text = self.service.read_file(&path).await?;
        Ok(vec![text_contents(
            params.uri,
            Some("text/plain".to_string()),
            text,
        )])
    }

    pub fn handle_prompt(&self, _params: GetPromptParams) -> HandlerResult<GetPromptResult> {
        Ok(user_prompt(
            Some("Filesystem guidance".to_string()),
            self.prompt.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::filesystem_provider::repo::TokioFileSystemRepository;
    use capmux_proto::{call_params, ToolResultExt};
    use serde_json::json;

    fn controller() -> (tempfile::TempDir, std::path::PathBuf, Arc<FileSystemProviderController>) {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        let service = FileSystemProviderService::new(
            Arc::new(TokioFileSystemRepository::new()),
            vec![root.clone()],
        );
        let controller = Arc::new(FileSystemProviderController::new(service, "fs".to_string()));
        (dir, root, controller)
    }

    #[test]
    fn test_register_exposes_full_surface() {
        let (_dir, _root, controller) = controller();
        let caps = CapabilitySet::new("FileSystem");
        controller.register(&caps).unwrap();

        let tools: Vec<String> = caps.tools().into_iter().map(|t| t.tool.name.to_string()).collect();
        assert_eq!(
            tools,
            vec![
                "read_file",
                "write_file",
                "list_directory",
                "create_directory",
                "move_file",
                "search_files",
                "get_file_info",
                "list_allowed_directories",
            ]
        );
        assert_eq!(caps.resources()[0].resource.uri, ALLOWED_DIRECTORIES_URI);
        assert_eq!(caps.resource_templates()[0].template.uri_template, FILE_TEMPLATE);
        assert_eq!(caps.prompts()[0].prompt.name, FILESYSTEM_PROMPT);
    }

    #[tokio::test]
    async fn test_write_then_read_through_tools() {
        let (_dir, _root, controller) = controller();
        let written = controller
            .handle_write_file(call_params(
                "write_file",
                json!({ "path": "hello.txt", "content": "hi there" }),
            ))
            .await
            .unwrap();
        assert!(!written.failed());

        let read = controller
            .handle_read_file(call_params("read_file", json!({ "path": "hello.txt" })))
            .await
            .unwrap();
        assert_eq!(read, tool_text("hi there"));
    }

    #[tokio::test]
    async fn test_outside_path_is_error_result() {
        let (_dir, _root, controller) = controller();
        let result = controller
            .handle_read_file(call_params("read_file", json!({ "path": "/etc/hostname" })))
            .await
            .unwrap();

        assert!(result.failed());
    }

    #[tokio::test]
    async fn test_file_template_reads_contents() {
        let (_dir, root, controller) = controller();
        std::fs::write(root.join("r.txt"), "resource body").unwrap();

        let contents = controller
            .handle_read_resource(ReadResourceParams {
                uri: format!("file://{}", root.join("r.txt").display()),
            })
            .await
            .unwrap();

        match &contents[0] {
            ResourceContents::TextResourceContents { text, mime_type, .. } => {
                assert_eq!(text, "resource body");
                assert_eq!(mime_type.as_deref(), Some("text/plain"));
            }
            other => panic!("expected text contents, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_template_outside_sandbox_fails() {
        let (_dir, _root, controller) = controller();
        let err = controller
            .handle_read_resource(ReadResourceParams {
                uri: "file:///etc/hostname".to_string(),
            })
            .await
            .unwrap_err();

        assert!(matches!(err, HandlerError::Internal(_)));
    }
}
