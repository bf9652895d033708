//! Google Gemini adapter using the `generateContent` endpoint.
//!
//! The API key travels as the `key` query parameter and the image as an
//! `inline_data` part next to the prompt.

use super::adapter::{error_from_response, request_failed, ModelAdapter, VisionRequest};
use crate::config::GeminiConfig;
use crate::error::{ParseError, ProcessError, ProcessResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Gemini adapter.
pub struct GeminiAdapter {
    endpoint: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl GeminiAdapter {
    pub fn new(config: &GeminiConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            client: reqwest::Client::new(),
        }
    }

    fn url_for(&self, model: &str) -> String {
        format!("{}/models/{model}:generateContent", self.endpoint)
    }
}

// --- Request types ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    InlineData { inline_data: InlineData },
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

// --- Response types ---

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[async_trait]
impl ModelAdapter for GeminiAdapter {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn invoke(&self, request: &VisionRequest, secret: &str) -> ProcessResult<String> {
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![
                    Part::Text {
                        text: request.prompt.clone(),
                    },
                    Part::InlineData {
                        inline_data: InlineData {
                            mime_type: request.image.media_type.clone(),
                            data: request.image.data.clone(),
                        },
                    },
                ],
            }],
            generation_config: GenerationConfig {
                temperature: self.temperature,
                max_output_tokens: self.max_tokens,
            },
        };

        let resp = self
            .client
            .post(self.url_for(&request.model))
            .query(&[("key", secret)])
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| request_failed("Gemini", e))?;

        if !resp.status().is_success() {
            return Err(error_from_response("Gemini", resp).await);
        }

        let generate_resp: GenerateResponse =
            resp.json().await.map_err(|e| ProcessError::Transport {
                message: format!("Failed to decode Gemini response: {e}"),
                status_code: None,
            })?;

        let text = generate_resp
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().find_map(|p| p.text))
            .map(|t| t.trim().to_string())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ParseError::EmptyResponse.into());
        }
        Ok(text)
    }
}
