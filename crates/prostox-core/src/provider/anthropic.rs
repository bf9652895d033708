//! Anthropic adapter using the Messages API.
//!
//! Sends prompt + image via base64 content blocks, authenticated with the
//! `x-api-key` header.

use super::adapter::{error_from_response, request_failed, ModelAdapter, VisionRequest};
use crate::config::AnthropicConfig;
use crate::error::{ParseError, ProcessError, ProcessResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic adapter using the Messages API.
pub struct AnthropicAdapter {
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(config: &AnthropicConfig) -> Self {
        Self {
            endpoint: config.endpoint.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }
}

// --- Request types ---

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: Vec<ContentBlock>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ContentBlock {
    #[serde(rename = "image")]
    Image { source: ImageSource },
    #[serde(rename = "text")]
    Text { text: String },
}

#[derive(Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: String,
    media_type: String,
    data: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    text: Option<String>,
}

#[async_trait]
impl ModelAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn invoke(&self, request: &VisionRequest, secret: &str) -> ProcessResult<String> {
        let body = MessagesRequest {
            model: request.model.clone(),
            max_tokens: self.max_tokens,
            temperature: Some(self.temperature),
            messages: vec![Message {
                role: "user".to_string(),
                content: vec![
                    ContentBlock::Text {
                        text: request.prompt.clone(),
                    },
                    ContentBlock::Image {
                        source: ImageSource {
                            source_type: "base64".to_string(),
                            media_type: request.image.media_type.clone(),
                            data: request.image.data.clone(),
                        },
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", secret)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("Claude", e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("Claude", resp).await);
        }

        let messages_resp: MessagesResponse =
            resp.json().await.map_err(|e| ProcessError::Transport {
                message: format!("Failed to decode Claude response: {e}"),
                status_code: None,
            })?;

        let text = messages_resp
            .content
            .into_iter()
            .filter_map(|c| c.text)
            .collect::<Vec<_>>()
            .join("");

        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(ParseError::EmptyResponse.into());
        }
        Ok(text)
    }
}
