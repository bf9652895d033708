//! OpenAI adapter using the Chat Completions API.
//!
//! Sends the image as a data URL in the user message content array,
//! authenticated with a bearer token. Serves both `gpt-4o` and `gpt-4o-mini`;
//! the model name travels in the request.

use super::adapter::{error_from_response, request_failed, ModelAdapter, VisionRequest};
use crate::config::OpenAiConfig;
use crate::error::{ParseError, ProcessError, ProcessResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// OpenAI adapter using Chat Completions API.
pub struct OpenAiAdapter {
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiAdapter {
    pub fn new(config: &OpenAiConfig) -> Self {
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
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<ChatContent>,
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum ChatContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

// --- Response types ---

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl ModelAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn invoke(&self, request: &VisionRequest, secret: &str) -> ProcessResult<String> {
        let body = ChatRequest {
            model: request.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ChatContent::Text {
                        text: request.prompt.clone(),
                    },
                    ChatContent::ImageUrl {
                        image_url: ImageUrl {
                            url: request.image.data_url(),
                        },
                    },
                ],
            }],
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {secret}"))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("OpenAI", e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("OpenAI", resp).await);
        }

        let chat_resp: ChatResponse = resp.json().await.map_err(|e| ProcessError::Transport {
            message: format!("Failed to decode OpenAI response: {e}"),
            status_code: None,
        })?;

        let text = chat_resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ParseError::EmptyResponse.into());
        }
        Ok(text)
    }
}
