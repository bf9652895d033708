//! Credential store.
//!
//! Holds named API keys per model with an active flag and usage counters,
//! persisted as one JSON array under [`STORAGE_KEY`]. The store runs under a
//! single [`ActivationPolicy`] fixed at construction:
//!
//! - `Single`: activating (or adding) a credential deactivates every other
//!   credential for the same model.
//! - `Multi`: flags are independent and [`CredentialStore::select`] returns
//!   the first active credential in insertion order.
//!
//! Every mutation is applied to a copy, persisted, and only then committed,
//! so a failed write leaves memory and disk in agreement.

mod storage;

pub use storage::{FileStore, KeyValueStore, MemoryStore};

use crate::config::ActivationPolicy;
use crate::error::CredentialError;
use crate::types::ModelId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Record name used in the backing key-value store.
pub const STORAGE_KEY: &str = "prostoxai_api_keys";

/// A named secret bound to one model.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: Uuid,
    pub model: ModelId,
    pub secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    pub is_active: bool,
    #[serde(default)]
    pub requests_made: u64,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// Secret with everything but the last four characters hidden.
    pub fn masked_secret(&self) -> String {
        let chars: Vec<char> = self.secret.chars().collect();
        if chars.len() <= 4 {
            return "*".repeat(chars.len());
        }
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}{tail}", "*".repeat(chars.len() - 4))
    }

    /// Nickname if set, otherwise the short id.
    pub fn label(&self) -> String {
        self.nickname
            .clone()
            .unwrap_or_else(|| self.id.to_string()[..8].to_string())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("model", &self.model)
            .field("secret", &self.masked_secret())
            .field("nickname", &self.nickname)
            .field("is_active", &self.is_active)
            .field("requests_made", &self.requests_made)
            .field("last_used_at", &self.last_used_at)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Persistent, policy-driven credential collection.
pub struct CredentialStore {
    policy: ActivationPolicy,
    backend: Box<dyn KeyValueStore>,
    credentials: Mutex<Vec<Credential>>,
}

impl CredentialStore {
    /// Open a store, loading any previously persisted credentials.
    pub fn open(
        backend: Box<dyn KeyValueStore>,
        policy: ActivationPolicy,
    ) -> Result<Self, CredentialError> {
        let credentials: Vec<Credential> = match backend.load(STORAGE_KEY)? {
            Some(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw)?,
            _ => Vec::new(),
        };

        if policy == ActivationPolicy::Single {
            for model in ModelId::ALL {
                let active = credentials
                    .iter()
                    .filter(|c| c.model == model && c.is_active)
                    .count();
                if active > 1 {
                    tracing::warn!(
                        "{active} active credentials for {model} under single-active policy; \
                         the first one will be used"
                    );
                }
            }
        }

        tracing::debug!("Loaded {} credential(s)", credentials.len());
        Ok(Self {
            policy,
            backend,
            credentials: Mutex::new(credentials),
        })
    }

    /// A store backed by process memory only.
    pub fn in_memory(policy: ActivationPolicy) -> Self {
        Self {
            policy,
            backend: Box::new(MemoryStore::new()),
            credentials: Mutex::new(Vec::new()),
        }
    }

    pub fn policy(&self) -> ActivationPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Credential>> {
        self.credentials.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy, persist it, then commit.
    fn mutate<T>(
        &self,
        change: impl FnOnce(&mut Vec<Credential>) -> Result<T, CredentialError>,
    ) -> Result<T, CredentialError> {
        let mut guard = self.lock();
        let mut next = guard.clone();
        let out = change(&mut next)?;
        let json = serde_json::to_string_pretty(&next)?;
        self.backend.save(STORAGE_KEY, &json)?;
        *guard = next;
        Ok(out)
    }

    fn deactivate_siblings(credentials: &mut [Credential], model: ModelId, keep: Uuid) {
        for other in credentials
            .iter_mut()
            .filter(|c| c.model == model && c.id != keep)
        {
            other.is_active = false;
        }
    }

    /// Add a credential for `model`. New credentials start active.
    pub fn add(
        &self,
        model: ModelId,
        secret: &str,
        nickname: Option<&str>,
    ) -> Result<Credential, CredentialError> {
        let secret = secret.trim();
        if secret.is_empty() {
            return Err(CredentialError::EmptySecret);
        }
        let credential = Credential {
            id: Uuid::new_v4(),
            model,
            secret: secret.to_string(),
            nickname: nickname
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .map(str::to_string),
            is_active: true,
            requests_made: 0,
            last_used_at: None,
            created_at: Utc::now(),
        };

        let policy = self.policy;
        let added = credential.clone();
        self.mutate(move |all| {
            if policy == ActivationPolicy::Single {
                Self::deactivate_siblings(all, model, credential.id);
            }
            all.push(credential);
            Ok(())
        })?;
        tracing::info!("Added credential {} for {model}", added.label());
        Ok(added)
    }

    pub fn remove(&self, id: Uuid) -> Result<Credential, CredentialError> {
        self.mutate(|all| {
            let index = all
                .iter()
                .position(|c| c.id == id)
                .ok_or(CredentialError::NotFound(id))?;
            Ok(all.remove(index))
        })
    }

    /// Toggle a credential. Under `Single`, activation deactivates siblings.
    pub fn set_active(&self, id: Uuid, active: bool) -> Result<Credential, CredentialError> {
        let policy = self.policy;
        self.mutate(|all| {
            let model = all
                .iter()
                .find(|c| c.id == id)
                .map(|c| c.model)
                .ok_or(CredentialError::NotFound(id))?;
            if active && policy == ActivationPolicy::Single {
                Self::deactivate_siblings(all, model, id);
            }
            let credential = all
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(CredentialError::NotFound(id))?;
            credential.is_active = active;
            Ok(credential.clone())
        })
    }

    /// Every credential in insertion order.
    pub fn list(&self) -> Vec<Credential> {
        self.lock().clone()
    }

    pub fn list_for(&self, model: ModelId) -> Vec<Credential> {
        self.lock()
            .iter()
            .filter(|c| c.model == model)
            .cloned()
            .collect()
    }

    /// The first active credential for `model`, if any.
    pub fn select(&self, model: ModelId) -> Option<Credential> {
        self.lock()
            .iter()
            .find(|c| c.model == model && c.is_active)
            .cloned()
    }

    /// Count one successful request against a credential.
    pub fn record_usage(&self, id: Uuid) -> Result<Credential, CredentialError> {
        self.mutate(|all| {
            let credential = all
                .iter_mut()
                .find(|c| c.id == id)
                .ok_or(CredentialError::NotFound(id))?;
            credential.requests_made += 1;
            credential.last_used_at = Some(Utc::now());
            Ok(credential.clone())
        })
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore")
            .field("policy", &self.policy)
            .field("credentials", &self.lock().len())
            .finish()
    }
}
