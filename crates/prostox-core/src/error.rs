//! Error types for Prostox.
//!
//! Errors are split by blast radius: `BatchError` aborts a whole orchestrator
//! call before any item is touched, while `ProcessError` is scoped to a single
//! item and always ends up as that item's error message.

use crate::types::{ModelId, StateKind};
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read the config file from disk
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    /// Failed to parse TOML configuration
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Configuration values are invalid
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Credential store errors.
#[derive(Error, Debug)]
pub enum CredentialError {
    /// No credential with this id exists
    #[error("No credential with id {0}")]
    NotFound(Uuid),

    /// The secret was empty after trimming
    #[error("Credential secret must not be empty")]
    EmptySecret,

    /// Reading or writing the backing key-value store failed
    #[error("Credential storage failed for {path}: {message}")]
    Storage { path: PathBuf, message: String },

    /// The persisted record could not be decoded
    #[error("Corrupt credential record: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors returned to the caller of an orchestrator or registry operation.
///
/// None of these leave an item in a changed state.
#[derive(Error, Debug)]
pub enum BatchError {
    /// No active credential is configured for the selected model
    #[error("API key required: add or activate a credential for {0}")]
    CredentialRequired(ModelId),

    /// Nothing is pending or failed
    #[error("No images to process")]
    NoWorkItems,

    /// The item id is not tracked by the registry
    #[error("Item not found: {0}")]
    ItemNotFound(Uuid),

    /// The item is already being processed
    #[error("Item {0} is already processing")]
    ItemBusy(Uuid),

    /// The requested state change is not part of the item lifecycle
    #[error("Item {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: StateKind,
        to: StateKind,
    },

    /// No adapter is registered for the selected model
    #[error("No provider adapter registered for {0}")]
    AdapterMissing(ModelId),
}

/// Per-item failures. These never escape the orchestrator; they become the
/// item's error message.
#[derive(Error, Debug)]
pub enum ProcessError {
    /// Network or provider-side failure
    #[error("{message}")]
    Transport {
        message: String,
        status_code: Option<u16>,
    },

    /// The provider call exceeded the request timeout
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The provider reply did not contain usable metadata
    #[error("Failed to parse AI response: {0}")]
    MalformedResponse(#[from] ParseError),

    /// The source content could not be read
    #[error("Failed to read image: {message}")]
    Encoding { message: String },
}

/// Response parser failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The provider returned no text at all
    #[error("Empty response")]
    EmptyResponse,

    /// No brace-delimited object in the text
    #[error("No JSON found in response")]
    NoJson,

    /// The extracted object is not valid JSON
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    /// A required field is missing or empty
    #[error("Invalid response structure: missing {0}")]
    MissingField(&'static str),
}

/// Export errors.
#[derive(Error, Debug)]
pub enum ExportError {
    /// No item has reached the done state
    #[error("No processed images to export")]
    NothingToExport,

    /// Writing the export failed
    #[error("Failed to write export: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for per-item results.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;
