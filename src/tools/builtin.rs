//! In-process tool servers.
//!
//! `pii-handler` exposes masking and unmasking against the run's session.
//! `text-utils` offers small payload transforms.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use super::{ToolCall, ToolHandler, ToolServer};
use crate::domain::Tool;
use crate::error::{RegistryUnavailableError, ToolInvocationError};
use crate::privacy::PiiMasker;

pub const PII_HANDLER: &str = "pii-handler";
pub const TEXT_UTILS: &str = "text-utils";

enum Operation {
    Sanitize(PiiMasker),
    Restore(PiiMasker),
    Trim,
    CollapseWhitespace,
    Append,
    Annotate,
}

struct BuiltinTool {
    descriptor: Tool,
    operation: Operation,
}

impl BuiltinTool {
    fn new(
        server: &str,
        name: &str,
        description: &str,
        operation: Operation,
    ) -> Arc<dyn ToolHandler> {
        Arc::new(Self {
            descriptor: Tool::new(server, name, description),
            operation,
        })
    }
}

#[async_trait]
impl ToolHandler for BuiltinTool {
    fn descriptor(&self) -> &Tool {
        &self.descriptor
    }

    async fn invoke(&self, call: ToolCall) -> Result<String, ToolInvocationError> {
        let server = self.descriptor.server.as_str();
        let tool = self.descriptor.name.as_str();

        match &self.operation {
            Operation::Sanitize(masker) => {
                Ok(masker.mask(&call.session_id, &call.payload).await.text)
            }
            Operation::Restore(masker) => {
                Ok(masker.unmask(&call.session_id, &call.payload).await.text)
            }
            Operation::Trim => Ok(call.payload.trim().to_string()),
            Operation::CollapseWhitespace => {
                Ok(call.payload.split_whitespace().collect::<Vec<_>>().join(" "))
            }
            Operation::Append => {
                let text = call.param_str("text").ok_or_else(|| {
                    ToolInvocationError::invalid_params(server, tool, "missing string parameter 'text'")
                })?;
                Ok(format!("{}{}", call.payload, text))
            }
            Operation::Annotate => {
                let label = call.param_str("label").unwrap_or(&self.descriptor.description);
                Ok(format!(
                    "{} [processed by {}.{} ({})]",
                    call.payload, server, tool, label
                ))
            }
        }
    }
}

/// A tool server whose tools run in-process
pub struct BuiltinServer {
    name: String,
    tools: Vec<Arc<dyn ToolHandler>>,
}

impl BuiltinServer {
    /// `pii-handler`: `sanitize_input` and `restore_pii`
    pub fn pii_handler(masker: PiiMasker) -> Self {
        Self {
            name: PII_HANDLER.to_string(),
            tools: vec![
                BuiltinTool::new(
                    PII_HANDLER,
                    "sanitize_input",
                    "Mask PII in the payload with session tokens",
                    Operation::Sanitize(masker.clone()),
                ),
                BuiltinTool::new(
                    PII_HANDLER,
                    "restore_pii",
                    "Restore session tokens to their original values",
                    Operation::Restore(masker),
                ),
            ],
        }
    }

    /// `text-utils`: `trim`, `collapse_whitespace`, `append`, `annotate`
    pub fn text_utils() -> Self {
        let append: Arc<dyn ToolHandler> = Arc::new(BuiltinTool {
            descriptor: Tool::new(TEXT_UTILS, "append", "Append params.text to the payload")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {"text": {"type": "string"}},
                    "required": ["text"]
                })),
            operation: Operation::Append,
        });

        Self {
            name: TEXT_UTILS.to_string(),
            tools: vec![
                BuiltinTool::new(TEXT_UTILS, "trim", "Strip leading and trailing whitespace", Operation::Trim),
                BuiltinTool::new(
                    TEXT_UTILS,
                    "collapse_whitespace",
                    "Collapse runs of whitespace to single spaces",
                    Operation::CollapseWhitespace,
                ),
                append,
                BuiltinTool::new(
                    TEXT_UTILS,
                    "annotate",
                    "Append a processing marker naming the step",
                    Operation::Annotate,
                ),
            ],
        }
    }
}

#[async_trait]
impl ToolServer for BuiltinServer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> Result<Vec<Arc<dyn ToolHandler>>, RegistryUnavailableError> {
        Ok(self.tools.clone())
    }

    async fn probe(&self) -> Result<(), RegistryUnavailableError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::InMemorySessionStore;

    async fn invoke(server: &BuiltinServer, tool: &str, call: ToolCall) -> Result<String, ToolInvocationError> {
        let tools = server.tools().await.unwrap();
        let handler = tools
            .iter()
            .find(|t| t.descriptor().name == tool)
            .expect("tool exists");
        handler.invoke(call).await
    }

    #[tokio::test]
    async fn test_text_utils() {
        let server = BuiltinServer::text_utils();

        let out = invoke(&server, "trim", ToolCall::new("  hi  ", "s")).await.unwrap();
        assert_eq!(out, "hi");

        let out = invoke(&server, "collapse_whitespace", ToolCall::new("a \n\t b", "s"))
            .await
            .unwrap();
        assert_eq!(out, "a b");

        let call = ToolCall::new("hi", "s").with_params(json!({"text": "!"}));
        assert_eq!(invoke(&server, "append", call).await.unwrap(), "hi!");
    }

    #[tokio::test]
    async fn test_append_requires_text() {
        let server = BuiltinServer::text_utils();
        let err = invoke(&server, "append", ToolCall::new("hi", "s")).await.unwrap_err();
        assert!(matches!(err, ToolInvocationError::InvalidParams { .. }));
    }

    #[tokio::test]
    async fn test_annotate_marker() {
        let server = BuiltinServer::text_utils();
        let call = ToolCall::new("body", "s").with_params(json!({"label": "tone check"}));
        let out = invoke(&server, "annotate", call).await.unwrap();
        assert_eq!(out, "body [processed by text-utils.annotate (tone check)]");
    }

    #[tokio::test]
    async fn test_append_schema_is_published() {
        let server = BuiltinServer::text_utils();
        let tools = server.tools().await.unwrap();
        let append = tools.iter().find(|t| t.descriptor().name == "append").unwrap();
        assert_eq!(append.descriptor().input_schema["required"][0], "text");
    }

    #[tokio::test]
    async fn test_pii_handler_round_trip() {
        let masker = PiiMasker::new(Arc::new(InMemorySessionStore::new()));
        let server = BuiltinServer::pii_handler(masker);

        let masked = invoke(&server, "sanitize_input", ToolCall::new("mail a@b.com", "s1"))
            .await
            .unwrap();
        assert!(!masked.contains("a@b.com"));

        let restored = invoke(&server, "restore_pii", ToolCall::new(masked, "s1"))
            .await
            .unwrap();
        assert_eq!(restored, "mail a@b.com");
    }
}
