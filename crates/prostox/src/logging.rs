//! Tracing setup for the CLI.
//!
//! Logs always go to stderr; stdout carries exported metadata. `RUST_LOG`
//! replaces the computed filter entirely when set.

use prostox_core::config::LoggingConfig;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Logging choices after CLI flags are folded into `[logging]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogSettings {
    level: LevelFilter,
    json: bool,
}

impl LogSettings {
    /// Flags only raise verbosity or switch to JSON, never the reverse.
    fn resolve(config: &LoggingConfig, verbose: bool, json_logs: bool) -> Self {
        let configured = config
            .level
            .trim()
            .parse::<LevelFilter>()
            .unwrap_or(LevelFilter::INFO);
        let level = if verbose {
            configured.max(LevelFilter::DEBUG)
        } else {
            configured
        };
        Self {
            level,
            json: json_logs || config.format.trim().eq_ignore_ascii_case("json"),
        }
    }

    /// Our crates log at the chosen level; HTTP and runtime deps stay at warn.
    fn directive(&self) -> String {
        let level = self.level.to_string().to_ascii_lowercase();
        format!("warn,prostox={level},prostox_core={level}")
    }
}

pub fn init_from_config(config: &prostox_core::Config, verbose: bool, json_logs: bool) {
    let settings = LogSettings::resolve(&config.logging, verbose, json_logs);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.directive()));

    let registry = tracing_subscriber::registry().with(filter);
    if settings.json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}
