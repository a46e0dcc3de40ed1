//! Completion provider capability and the Anthropic Messages API client.
//!
//! The fallback compiler only sees [`CompletionProvider`]: a prompt plus a JSON
//! schema in, the raw JSON text of a schema-shaped answer out. The Anthropic
//! client enforces the schema by forcing a single tool call whose input schema
//! is the requested one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use crate::error::ProviderError;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-5";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// One schema-constrained completion.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// Name of the structured answer, e.g. `compile_rate`.
    pub tool_name: String,
    pub system: String,
    pub prompt: String,
    /// JSON schema the answer must satisfy.
    pub schema: Value,
}

/// Narrow capability the fallback compiler depends on.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Return the raw JSON text of the answer. An empty string means the
    /// provider produced no answer.
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Box<P> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        (**self).complete(request).await
    }
}

#[async_trait]
impl<P: CompletionProvider + ?Sized> CompletionProvider for Arc<P> {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        (**self).complete(request).await
    }
}

/// Connection settings for [`AnthropicProvider`].
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub max_tokens: u32,
    /// Transport timeout; the fallback compiler applies its own deadline too.
    pub timeout: Duration,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens: 8192,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

pub struct AnthropicProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    ToolUse { input: Value },
    #[serde(other)]
    Other,
}

impl AnthropicProvider {
    pub fn new(mut config: ProviderConfig) -> Result<Self, ProviderError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        let client = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn request_body(&self, request: &CompletionRequest) -> Value {
        json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "system": request.system,
            "messages": [{ "role": "user", "content": request.prompt }],
            "tools": [{
                "name": request.tool_name,
                "description": "Return the compiled rate formula(s).",
                "input_schema": tool_input_schema(&request.schema),
            }],
            "tool_choice": { "type": "tool", "name": request.tool_name },
        })
    }
}

/// Tool inputs must be objects, so array schemas are wrapped as `{items: [...]}`.
fn tool_input_schema(schema: &Value) -> Value {
    if schema["type"] == "array" {
        json!({
            "type": "object",
            "properties": { "items": schema },
            "required": ["items"],
        })
    } else {
        schema.clone()
    }
}

/// Undo [`tool_input_schema`] wrapping and render the answer as JSON text.
fn extract_answer(schema: &Value, content: Vec<ContentBlock>) -> Result<String, ProviderError> {
    let mut text = String::new();
    for block in content {
        match block {
            ContentBlock::ToolUse { mut input } => {
                if schema["type"] == "array" {
                    input = input.get_mut("items").map(Value::take).unwrap_or(Value::Null);
                }
                return Ok(serde_json::to_string(&input)?);
            }
            ContentBlock::Text { text: t } => text.push_str(&t),
            ContentBlock::Other => {}
        }
    }
    Ok(text.trim().to_string())
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let url = format!("{}/v1/messages", self.config.base_url);
        debug!(model = %self.config.model, tool = %request.tool_name, "requesting completion");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(&request))
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::Server {
                status: status.as_u16(),
                body,
            });
        }
        let body: MessagesResponse = resp.json().await?;
        extract_answer(&request.schema, body.content)
    }
}
