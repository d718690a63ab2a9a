// Protocol model shared by providers and the endpoint. Wire types come from
// rmcp; this module adds the builders providers use to describe capabilities.

use serde_json::{Map, Value};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

pub use rmcp::model::{
    AnnotateAble, CallToolRequestParam, CallToolResult, Content, ErrorCode,
    GetPromptRequestParam, GetPromptResult, Implementation, JsonObject, Prompt, PromptArgument,
    PromptMessage, PromptMessageContent, PromptMessageRole, ProtocolVersion, RawContent,
    RawResource, RawResourceTemplate, ReadResourceRequestParam, ReadResourceResult, RequestId,
    Resource, ResourceContents, ResourceTemplate, ServerCapabilities, ServerInfo, Tool,
};
pub use rmcp::ErrorData;

pub type CallToolParams = CallToolRequestParam;
pub type ReadResourceParams = ReadResourceRequestParam;
pub type GetPromptParams = GetPromptRequestParam;

/// A tool whose input schema is an object with no properties yet.
pub fn tool(
    name: impl Into<Cow<'static, str>>,
    description: impl Into<Cow<'static, str>>,
) -> Tool {
    let mut schema = JsonObject::new();
    schema.insert("type".to_string(), Value::String("object".to_string()));
    schema.insert("properties".to_string(), Value::Object(Map::new()));
    Tool::new(name, description, Arc::new(schema))
}

/// Adds typed properties to a tool's input schema.
pub trait ToolSchema: Sized {
    fn with_param(self, name: &str, kind: &str, description: &str, required: bool) -> Self;

    fn with_string_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "string", description, required)
    }

    fn with_number_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "number", description, required)
    }

    fn with_bool_param(self, name: &str, description: &str, required: bool) -> Self {
        self.with_param(name, "boolean", description, required)
    }
}

impl ToolSchema for Tool {
    fn with_param(mut self, name: &str, kind: &str, description: &str, required: bool) -> Self {
        let schema = Arc::make_mut(&mut self.input_schema);
        if let Some(properties) = schema
            .entry("properties")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
        {
            properties.insert(
                name.to_string(),
                serde_json::json!({ "type": kind, "description": description }),
            );
        }
        if required {
            if let Some(list) = schema
                .entry("required")
                .or_insert_with(|| Value::Array(Vec::new()))
                .as_array_mut()
            {
                list.push(Value::String(name.to_string()));
            }
        }
        self
    }
}

pub fn resource(uri: impl Into<String>, name: impl Into<String>) -> Resource {
    RawResource::new(uri, name).no_annotation()
}

pub fn resource_template(uri_template: impl Into<String>, name: impl Into<String>) -> ResourceTemplate {
    RawResourceTemplate {
        uri_template: uri_template.into(),
        name: name.into(),
        title: None,
        description: None,
        mime_type: None,
    }
    .no_annotation()
}

/// Optional descriptive fields shared by resources and templates.
pub trait Describe: Sized {
    fn with_description(self, description: impl Into<String>) -> Self;
    fn with_mime_type(self, mime_type: impl Into<String>) -> Self;
}

impl Describe for Resource {
    fn with_description(mut self, description: impl Into<String>) -> Self {
        self.raw.description = Some(description.into());
        self
    }

    fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.raw.mime_type = Some(mime_type.into());
        self
    }
}

impl Describe for ResourceTemplate {
    fn with_description(mut self, description: impl Into<String>) -> Self {
        self.raw.description = Some(description.into());
        self
    }

    fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.raw.mime_type = Some(mime_type.into());
        self
    }
}

/// Matching of concrete URIs against a `{name}` style template.
pub trait UriTemplate {
    fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>>;
}

impl UriTemplate for ResourceTemplate {
    fn match_uri(&self, uri: &str) -> Option<HashMap<String, String>> {
        match_uri_template(&self.raw.uri_template, uri)
    }
}

/// Matches `uri` against `template`, returning the expanded variables.
///
/// Only simple `{name}` expressions are understood. The last variable in a
/// template greedily consumes the rest of the URI, so `file://{path}`
/// matches nested paths.
pub fn match_uri_template(template: &str, uri: &str) -> Option<HashMap<String, String>> {
    let mut vars = HashMap::new();
    let mut rest = uri;
    let mut template = template;

    while !template.is_empty() {
        match template.find('{') {
            Some(open) => {
                let literal = &template[..open];
                rest = rest.strip_prefix(literal)?;
                let close = template[open..].find('}')? + open;
                let name = &template[open + 1..close];
                template = &template[close + 1..];

                let value = match template.find('{') {
                    _ if template.is_empty() => {
                        let value = rest;
                        rest = "";
                        value
                    }
                    Some(next_open) => {
                        let next_literal = &template[..next_open];
                        let end = rest.find(next_literal)?;
                        let value = &rest[..end];
                        rest = &rest[end..];
                        value
                    }
                    None => {
                        let end = rest.rfind(template)?;
                        let value = &rest[..end];
                        rest = &rest[end..];
                        value
                    }
                };
                if value.is_empty() {
                    return None;
                }
                vars.insert(name.to_string(), value.to_string());
            }
            None => {
                rest = rest.strip_prefix(template)?;
                template = "";
            }
        }
    }

    if rest.is_empty() {
        Some(vars)
    } else {
        None
    }
}

pub fn prompt(name: impl Into<String>, description: impl Into<String>) -> Prompt {
    Prompt::new(name, Some(description.into()), None)
}

/// Single user-role text message, the shape every built-in prompt uses.
pub fn user_prompt(description: Option<String>, text: impl Into<String>) -> GetPromptResult {
    GetPromptResult {
        description,
        messages: vec![PromptMessage::new_text(PromptMessageRole::User, text)],
    }
}

pub fn tool_text(text: impl Into<String>) -> CallToolResult {
    CallToolResult::success(vec![Content::text(text)])
}

/// A tool result flagged `isError`, for failures the caller should see.
pub fn tool_error(message: impl Into<String>) -> CallToolResult {
    CallToolResult::error(vec![Content::text(message)])
}

pub trait ToolResultExt {
    fn failed(&self) -> bool;
}

impl ToolResultExt for CallToolResult {
    fn failed(&self) -> bool {
        self.is_error.unwrap_or(false)
    }
}

pub fn text_contents(
    uri: impl Into<String>,
    mime_type: Option<String>,
    text: impl Into<String>,
) -> ResourceContents {
    ResourceContents::TextResourceContents {
        uri: uri.into(),
        mime_type,
        text: text.into(),
        meta: None,
    }
}

/// Builds call params from a JSON object; anything else means no arguments.
pub fn call_params(name: impl Into<Cow<'static, str>>, arguments: Value) -> CallToolParams {
    CallToolParams {
        name: name.into(),
        arguments: arguments.as_object().cloned(),
    }
}

/// Typed access to tool call arguments.
pub trait ToolArgs {
    fn arg(&self, key: &str) -> Option<&Value>;

    fn str_arg(&self, key: &str) -> Option<&str> {
        self.arg(key).and_then(Value::as_str)
    }

    /// Whole floats such as `12.0` count; many clients send every number
    /// as a double.
    fn u64_arg(&self, key: &str) -> Option<u64> {
        let value = self.arg(key)?;
        value.as_u64().or_else(|| {
            value
                .as_f64()
                .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
                .map(|n| n as u64)
        })
    }

    fn bool_arg(&self, key: &str) -> Option<bool> {
        self.arg(key).and_then(Value::as_bool)
    }
}

impl ToolArgs for CallToolParams {
    fn arg(&self, key: &str) -> Option<&Value> {
        self.arguments.as_ref().and_then(|args| args.get(key))
    }
}
