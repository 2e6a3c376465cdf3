//! Anthropic Messages API client and prompt shapes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use scorchbook_shared::{LlmConfig, Result, ScorchbookError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

/// Messages API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Token budget for text extraction prompts.
const TEXT_MAX_TOKENS: u32 = 600;

/// Token budget for image extraction prompts.
const VISION_MAX_TOKENS: u32 = 800;

/// Sampling temperature for every extraction prompt.
const EXTRACTION_TEMPERATURE: f32 = 0.2;

// =============================================================================
// Messages
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: MessageContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image")]
    Image { source: ImageSource },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

impl WireMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(content.into()),
        }
    }

    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Inline base64 image.
    pub fn image(media_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self::Image {
            source: ImageSource {
                kind: "base64".into(),
                media_type: media_type.into(),
                data: data.into(),
            },
        }
    }
}

// =============================================================================
// Chat Request
// =============================================================================

/// Request body minus `model`, which the client fills in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub max_tokens: u32,
    pub messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl Default for ChatRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatRequest {
    pub fn new() -> Self {
        Self {
            max_tokens: 1024,
            messages: Vec::new(),
            system: None,
            temperature: None,
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn message(mut self, message: WireMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Instructions and input as two text blocks of one user turn.
pub fn text_prompt(instructions: &str, input: &str) -> ChatRequest {
    ChatRequest::new()
        .max_tokens(TEXT_MAX_TOKENS)
        .temperature(EXTRACTION_TEMPERATURE)
        .message(WireMessage::user_blocks(vec![
            ContentBlock::text(instructions),
            ContentBlock::text(input),
        ]))
}

/// Instructions followed by an inline base64 image.
pub fn vision_prompt(instructions: &str, image_base64: &str, image_mime_type: &str) -> ChatRequest {
    ChatRequest::new()
        .max_tokens(VISION_MAX_TOKENS)
        .temperature(EXTRACTION_TEMPERATURE)
        .message(WireMessage::user_blocks(vec![
            ContentBlock::text(instructions),
            ContentBlock::image(image_mime_type, image_base64),
        ]))
}

/// Model text from a Messages (or legacy completion) response body: the
/// concatenated `text` of every content block, else `completion`, else
/// empty. A body that is a bare JSON string is returned as-is.
pub fn extract_claude_text(response: &Value) -> String {
    if let Some(raw) = response.as_str() {
        return raw.to_string();
    }
    if let Some(blocks) = response.get("content").and_then(Value::as_array) {
        return blocks
            .iter()
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect();
    }
    response
        .get("completion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// =============================================================================
// LanguageModel trait
// =============================================================================

/// A hosted chat model reachable through the Messages API shape.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Identifier of the model requests are sent to.
    fn model_id(&self) -> &str;

    /// Send a raw request body (without `model`) and return the response
    /// JSON. Non-JSON response bodies come back as a JSON string.
    async fn invoke_raw(&self, body: Value) -> Result<Value>;

    /// Send a prompt and return the model's text.
    async fn invoke(&self, request: &ChatRequest) -> Result<String> {
        let body = serde_json::to_value(request)
            .map_err(|e| ScorchbookError::Enrichment(format!("failed to encode request: {e}")))?;
        let response = self.invoke_raw(body).await?;
        Ok(extract_claude_text(&response))
    }
}

// =============================================================================
// ClaudeClient
// =============================================================================

/// Direct client for `POST {base_url}/messages`.
#[derive(Debug, Clone)]
pub struct ClaudeClient {
    api_key: String,
    http: reqwest::Client,
    base_url: String,
    model: String,
}

impl ClaudeClient {
    pub fn new(api_key: &str, config: &LlmConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScorchbookError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.to_string(),
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    /// Build a client reading the key from the env var named in config.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = scorchbook_shared::require_api_key(&config.api_key_env, "Anthropic")?;
        Self::new(&api_key, config)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-api-key",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| ScorchbookError::config(format!("invalid API key header: {e}")))?,
        );
        headers.insert("anthropic-version", HeaderValue::from_static(ANTHROPIC_VERSION));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl LanguageModel for ClaudeClient {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn invoke_raw(&self, body: Value) -> Result<Value> {
        let mut body = body;
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".into(), Value::String(self.model.clone()));
        }

        let url = format!("{}/messages", self.base_url);
        debug!(model = %self.model, "Claude chat request");

        let response = self
            .http
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "bedrock.invoke.failed");
                ScorchbookError::Network(format!("{url}: {e}"))
            })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ScorchbookError::Network(format!("{url}: failed to read body: {e}")))?;

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            warn!(status = status.as_u16(), "bedrock.invoke.failed");
            return Err(ScorchbookError::ModelAccessDenied(format!(
                "model API returned {status}: {text}"
            )));
        }
        if !status.is_success() {
            warn!(status = status.as_u16(), "bedrock.invoke.failed");
            return Err(ScorchbookError::Enrichment(format!(
                "model API error ({status}): {text}"
            )));
        }

        match serde_json::from_str(&text) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(error = %e, "bedrock.response.parse.failed");
                Ok(Value::String(text))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> ClaudeClient {
        let config = LlmConfig {
            base_url: server.uri(),
            ..LlmConfig::default()
        };
        ClaudeClient::new("sk-test", &config).unwrap()
    }

    #[test]
    fn text_prompt_shape() {
        let request = text_prompt("Do the thing.", "{\"a\":1}");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_tokens"], 600);
        assert!((value["temperature"].as_f64().unwrap() - 0.2).abs() < 1e-6);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["messages"][0]["content"][0], json!({"type": "text", "text": "Do the thing."}));
        assert_eq!(value["messages"][0]["content"][1]["text"], "{\"a\":1}");
        assert!(value.get("system").is_none());
    }

    #[test]
    fn vision_prompt_shape() {
        let request = vision_prompt("Read the label.", "aGVsbG8=", "image/png");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["max_tokens"], 800);
        assert_eq!(
            value["messages"][0]["content"][1],
            json!({
                "type": "image",
                "source": {"type": "base64", "media_type": "image/png", "data": "aGVsbG8="}
            })
        );
    }

    #[test]
    fn extracts_text_from_responses() {
        let messages = json!({"content": [{"type": "text", "text": "{\"a\":"}, {"type": "text", "text": "1}"}]});
        assert_eq!(extract_claude_text(&messages), "{\"a\":1}");
        assert_eq!(extract_claude_text(&json!({"completion": "legacy"})), "legacy");
        assert_eq!(extract_claude_text(&json!({"other": true})), "");
        assert_eq!(extract_claude_text(&json!("raw body")), "raw body");
    }

    #[tokio::test]
    async fn invoke_sends_headers_and_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "sk-test"))
            .and(header("anthropic-version", ANTHROPIC_VERSION))
            .and(body_partial_json(json!({"model": "claude-3-haiku-20240307", "max_tokens": 600})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "{\"name\": \"Rojo\"}"}],
                "stop_reason": "end_turn"
            })))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let text = client.invoke(&text_prompt("x", "y")).await.unwrap();
        assert_eq!(text, "{\"name\": \"Rojo\"}");
    }

    #[tokio::test]
    async fn access_denied_maps_to_dedicated_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("no access"))
            .mount(&server)
            .await;

        let err = client_for(&server).invoke_raw(json!({"messages": []})).await.unwrap_err();
        assert!(matches!(err, ScorchbookError::ModelAccessDenied(_)));
    }

    #[tokio::test]
    async fn server_error_is_enrichment_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = client_for(&server).invoke(&text_prompt("x", "y")).await.unwrap_err();
        assert!(matches!(err, ScorchbookError::Enrichment(_)));
        assert!(err.to_string().contains("overloaded"));
    }

    #[tokio::test]
    async fn non_json_body_returned_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain words"))
            .mount(&server)
            .await;

        let text = client_for(&server).invoke(&text_prompt("x", "y")).await.unwrap();
        assert_eq!(text, "plain words");
    }
}
