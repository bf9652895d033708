//! Prompt and listing styles shared by the commands.

use console::{style, Style};
use dialoguer::theme::ColorfulTheme;

/// Dialoguer theme for prompts. Everything renders on stderr so stdout stays
/// clean for piped CSV.
pub fn prostox_theme() -> ColorfulTheme {
    ColorfulTheme {
        prompt_prefix: style("?".to_string()).for_stderr().cyan(),
        prompt_style: Style::new().for_stderr().bold(),
        prompt_suffix: style("›".to_string()).for_stderr().bright().black(),
        success_prefix: style("✓".to_string()).for_stderr().green(),
        error_prefix: style("✗".to_string()).for_stderr().red(),
        error_style: Style::new().for_stderr().red(),
        values_style: Style::new().for_stderr().green(),
        ..ColorfulTheme::default()
    }
}

/// Style for active markers and success counts.
pub fn ok() -> Style {
    Style::new().green()
}

/// Style for failure counts and warnings.
pub fn warn() -> Style {
    Style::new().yellow()
}

/// Style for secondary details.
pub fn dim() -> Style {
    Style::new().dim()
}
