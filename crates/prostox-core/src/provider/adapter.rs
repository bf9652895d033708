//! Model adapter trait and request types.
//!
//! Defines the interface every vision provider implements. Adapters only
//! move bytes: they encode the image, attach the credential the way their
//! provider expects, and hand back the raw reply text. Parsing, retries and
//! state tracking belong to the orchestrator.

use crate::error::{ProcessError, ProcessResult};
use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

/// Instruction sent with every image. The reply is expected to contain one
/// JSON object with `title`, `keywords` and `category`.
pub const STOCK_METADATA_PROMPT: &str = "This is a stock photo. Generate an SEO-friendly title \
     (max 70 characters), up to 50 microstock-style keywords, and select an Adobe Stock \
     category. Return a JSON like this: { \"title\": \"...\", \"keywords\": [\"...\"], \
     \"category\": \"...\" }";

/// Base64-encoded image ready to send to a provider.
#[derive(Debug, Clone)]
pub struct ImageInput {
    /// Base64-encoded image bytes
    pub data: String,
    /// MIME type (e.g., "image/jpeg", "image/png")
    pub media_type: String,
}

impl ImageInput {
    /// Create an `ImageInput` from raw bytes and format string.
    ///
    /// The format is the file extension (e.g., "jpeg", "png", "webp").
    pub fn from_bytes(bytes: &[u8], format: &str) -> Self {
        let media_type = match format.to_lowercase().as_str() {
            "jpeg" | "jpg" => "image/jpeg",
            "png" => "image/png",
            "webp" => "image/webp",
            "gif" => "image/gif",
            other => {
                tracing::warn!("Unknown image format '{other}', defaulting to image/jpeg");
                "image/jpeg"
            }
        };

        Self {
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
            media_type: media_type.to_string(),
        }
    }

    /// Return a data URL suitable for OpenAI-style APIs.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// One metadata request for one image.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub image: ImageInput,
    pub prompt: String,
    /// Provider-side model name (e.g. "gpt-4o-mini")
    pub model: String,
}

impl VisionRequest {
    /// Build the stock metadata request for `image` against `model`.
    pub fn stock_metadata(image: ImageInput, model: &str) -> Self {
        Self {
            image,
            prompt: STOCK_METADATA_PROMPT.to_string(),
            model: model.to_string(),
        }
    }
}

/// Capability implemented once per AI provider.
///
/// Uses `async_trait` because native async fn in trait is not object-safe
/// (the registry hands out `Arc<dyn ModelAdapter>`).
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Provider name for logging (e.g., "anthropic", "gemini").
    fn name(&self) -> &str;

    /// Send the request with `secret` attached and return the reply text.
    ///
    /// Non-success responses surface as [`ProcessError::Transport`] carrying
    /// the provider's own error message.
    async fn invoke(&self, request: &VisionRequest, secret: &str) -> ProcessResult<String>;
}

/// Resolve `${ENV_VAR}` references in stored secrets.
pub fn resolve_env_var(value: &str) -> Option<String> {
    if value.starts_with("${") && value.ends_with('}') {
        let var_name = &value[2..value.len() - 1];
        std::env::var(var_name).ok()
    } else if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorBody>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Convert a non-success HTTP response into a transport error.
///
/// Every supported provider reports failures as `{"error": {"message": ...}}`;
/// when that is absent the status reason is used instead.
pub(crate) async fn error_from_response(label: &str, resp: reqwest::Response) -> ProcessError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ErrorEnvelope>(&body)
        .ok()
        .and_then(|e| e.error)
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .map(str::to_string)
                .unwrap_or_else(|| status.to_string())
        });

    ProcessError::Transport {
        message: format!("{label} API Error: {detail}"),
        status_code: Some(status.as_u16()),
    }
}

/// Convert a request-level failure (DNS, connect, TLS) into a transport error.
pub(crate) fn request_failed(label: &str, err: reqwest::Error) -> ProcessError {
    ProcessError::Transport {
        message: format!("{label} request failed: {err}"),
        status_code: None,
    }
}
