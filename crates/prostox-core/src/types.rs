//! Core data types shared across the registry, providers and export.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum title length in characters.
pub const MAX_TITLE_CHARS: usize = 70;

/// Maximum number of keywords kept per image.
pub const MAX_KEYWORDS: usize = 50;

/// The AI provider behind a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Anthropic,
    OpenAi,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::Google => write!(f, "Google"),
            Provider::Anthropic => write!(f, "Anthropic"),
            Provider::OpenAi => write!(f, "OpenAI"),
        }
    }
}

/// Identifier of a provider + model variant pair.
///
/// The set is closed: adding a model means adding a variant here and an
/// adapter mapping in [`crate::provider::AdapterRegistry`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelId {
    #[default]
    #[serde(rename = "gemini-2.0-flash")]
    Gemini20Flash,
    #[serde(rename = "claude-3-5-sonnet")]
    Claude35Sonnet,
    #[serde(rename = "gpt-4o")]
    Gpt4o,
    #[serde(rename = "gpt-4o-mini")]
    Gpt4oMini,
}

impl ModelId {
    /// Every supported model, in catalogue order.
    pub const ALL: [ModelId; 4] = [
        ModelId::Gemini20Flash,
        ModelId::Claude35Sonnet,
        ModelId::Gpt4o,
        ModelId::Gpt4oMini,
    ];

    /// Stable identifier used in config, storage and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Gemini20Flash => "gemini-2.0-flash",
            ModelId::Claude35Sonnet => "claude-3-5-sonnet",
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt4oMini => "gpt-4o-mini",
        }
    }

    /// Human-readable model name.
    pub fn display_name(&self) -> &'static str {
        match self {
            ModelId::Gemini20Flash => "Gemini 2.0 Flash",
            ModelId::Claude35Sonnet => "Claude 3.5 Sonnet",
            ModelId::Gpt4o => "GPT-4o",
            ModelId::Gpt4oMini => "GPT-4o Mini",
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            ModelId::Gemini20Flash => Provider::Google,
            ModelId::Claude35Sonnet => Provider::Anthropic,
            ModelId::Gpt4o | ModelId::Gpt4oMini => Provider::OpenAi,
        }
    }

    /// Model name sent to the provider API.
    pub fn api_model(&self) -> &'static str {
        match self {
            ModelId::Gemini20Flash => "gemini-2.0-flash-exp",
            ModelId::Claude35Sonnet => "claude-3-5-sonnet-20241022",
            ModelId::Gpt4o => "gpt-4o",
            ModelId::Gpt4oMini => "gpt-4o-mini",
        }
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        ModelId::ALL
            .into_iter()
            .find(|m| m.as_str() == needle)
            .ok_or_else(|| {
                let known: Vec<&str> = ModelId::ALL.iter().map(|m| m.as_str()).collect();
                format!("Unknown model '{s}' (expected one of: {})", known.join(", "))
            })
    }
}

/// Stock metadata generated for one image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// SEO title, at most [`MAX_TITLE_CHARS`] characters
    pub title: String,

    /// Ordered keywords, at most [`MAX_KEYWORDS`], none empty
    pub keywords: Vec<String>,

    /// Stock agency category
    pub category: String,
}

/// Lifecycle state of a tracked item.
///
/// Result payloads live inside the variants, so an item carries metadata
/// exactly when it is `Done` and an error message exactly when it is `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ItemState {
    Pending,
    Processing,
    Done { metadata: Metadata },
    Error { message: String },
}

impl ItemState {
    pub fn kind(&self) -> StateKind {
        match self {
            ItemState::Pending => StateKind::Pending,
            ItemState::Processing => StateKind::Processing,
            ItemState::Done { .. } => StateKind::Done,
            ItemState::Error { .. } => StateKind::Error,
        }
    }
}

/// Payload-free view of [`ItemState`], used for filtering and counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateKind {
    Pending,
    Processing,
    Done,
    Error,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateKind::Pending => write!(f, "pending"),
            StateKind::Processing => write!(f, "processing"),
            StateKind::Done => write!(f, "done"),
            StateKind::Error => write!(f, "error"),
        }
    }
}
