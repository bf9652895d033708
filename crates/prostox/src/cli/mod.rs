//! Command implementations.

pub mod config;
pub mod keys;
pub mod models;
pub mod process;
mod theme;

use prostox_core::{Config, CredentialStore, FileStore};

/// Open the on-disk credential store under the configured data directory.
pub fn open_credentials(config: &Config) -> anyhow::Result<CredentialStore> {
    let dir = config.data_dir();
    let store = CredentialStore::open(Box::new(FileStore::new(&dir)), config.credentials.policy)?;
    tracing::debug!("Credential store at {}", dir.display());
    Ok(store)
}
