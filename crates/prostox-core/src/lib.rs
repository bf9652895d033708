//! Prostox Core - stock-photo metadata generation library.
//!
//! Prostox takes a set of images and asks a vision model for a stock-site
//! title, keyword list and category for each one.
//!
//! # Architecture
//!
//! ```text
//! Discover → ItemRegistry → Orchestrator (groups of N) → ModelAdapter → Parser → Export
//!                                ↑
//!                         CredentialStore
//! ```
//!
//! Both stores are passed explicitly to the [`Orchestrator`], so callers (and
//! tests) can swap in in-memory backends.
//!
//! # Usage
//!
//! ```rust,ignore
//! use prostox_core::{
//!     AdapterRegistry, BatchOptions, Config, CredentialStore, FileStore,
//!     ItemRegistry, ModelId, Orchestrator,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load()?;
//!     let credentials = Arc::new(CredentialStore::open(
//!         Box::new(FileStore::new(config.data_dir())),
//!         config.credentials.policy,
//!     )?);
//!     let registry = Arc::new(ItemRegistry::new());
//!     registry.add_path("./barn.jpg".as_ref());
//!
//!     let orchestrator = Orchestrator::new(
//!         registry.clone(),
//!         credentials,
//!         Arc::new(AdapterRegistry::from_config(&config.providers)),
//!         BatchOptions::from(&config.batch),
//!     );
//!     orchestrator.process_all(ModelId::Gemini20Flash).await?;
//!     print!("{}", prostox_core::export::to_csv(&registry.snapshot())?);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod credentials;
pub mod discovery;
pub mod error;
pub mod export;
pub mod orchestrator;
pub mod parser;
pub mod provider;
pub mod registry;
pub mod types;

pub use config::{ActivationPolicy, Config};
pub use credentials::{Credential, CredentialStore, FileStore, KeyValueStore, MemoryStore};
pub use discovery::{DiscoveredFile, FileDiscovery};
pub use error::{
    BatchError, ConfigError, CredentialError, ExportError, ParseError, ProcessError,
    ProcessResult,
};
pub use export::{ExportFormat, ExportRecord};
pub use orchestrator::{BatchOptions, BatchSummary, ItemOutcome, Orchestrator};
pub use provider::{AdapterRegistry, ModelAdapter, VisionRequest};
pub use registry::{Item, ItemRegistry, ProgressStats, SourceRef};
pub use types::{ItemState, Metadata, ModelId, Provider, StateKind};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
