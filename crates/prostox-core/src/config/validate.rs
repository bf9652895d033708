//! Configuration validation with range checks.

use crate::error::ConfigError;

use super::Config;

impl Config {
    /// Validate configuration values are within acceptable ranges.
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.batch.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "batch.batch_size must be > 0".into(),
            ));
        }
        if self.batch.request_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "batch.request_timeout_ms must be > 0".into(),
            ));
        }
        let providers = &self.providers;
        for (name, endpoint, max_tokens, temperature) in [
            (
                "gemini",
                &providers.gemini.endpoint,
                providers.gemini.max_tokens,
                providers.gemini.temperature,
            ),
            (
                "anthropic",
                &providers.anthropic.endpoint,
                providers.anthropic.max_tokens,
                providers.anthropic.temperature,
            ),
            (
                "openai",
                &providers.openai.endpoint,
                providers.openai.max_tokens,
                providers.openai.temperature,
            ),
        ] {
            if endpoint.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{name}.endpoint must not be empty"
                )));
            }
            if max_tokens == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{name}.max_tokens must be > 0"
                )));
            }
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::ValidationError(format!(
                    "providers.{name}.temperature must be between 0.0 and 2.0"
                )));
            }
        }
        if self.processing.supported_formats.is_empty() {
            return Err(ConfigError::ValidationError(
                "processing.supported_formats must not be empty".into(),
            ));
        }
        Ok(())
    }
}
