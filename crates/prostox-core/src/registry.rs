//! In-memory item registry.
//!
//! The registry is the single source of truth for every uploaded image and
//! its lifecycle state. All mutations are keyed by item id and happen under a
//! short-lived lock, so concurrent completions from one group never overwrite
//! each other.

use crate::error::{BatchError, ProcessError, ProcessResult};
use crate::types::{ItemState, Metadata, StateKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Handle to an item's binary content.
#[derive(Debug, Clone)]
pub enum SourceRef {
    /// Image on disk, read when the item is dispatched
    File(PathBuf),
    /// Image already held in memory (e.g. an upload buffer)
    Memory { bytes: Arc<[u8]>, format: String },
}

impl SourceRef {
    /// Image format identifier, lowercased ("jpeg", "png", ...).
    pub fn format(&self) -> String {
        match self {
            SourceRef::File(path) => path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(str::to_lowercase)
                .unwrap_or_default(),
            SourceRef::Memory { format, .. } => format.to_lowercase(),
        }
    }

    /// Load the content. Missing, unreadable or empty sources are encoding
    /// failures.
    pub async fn read(&self) -> ProcessResult<Vec<u8>> {
        let bytes = match self {
            SourceRef::File(path) => {
                tokio::fs::read(path)
                    .await
                    .map_err(|e| ProcessError::Encoding {
                        message: format!("{}: {e}", path.display()),
                    })?
            }
            SourceRef::Memory { bytes, .. } => bytes.to_vec(),
        };
        if bytes.is_empty() {
            return Err(ProcessError::Encoding {
                message: "image content is empty".to_string(),
            });
        }
        Ok(bytes)
    }
}

/// One tracked image.
#[derive(Debug, Clone)]
pub struct Item {
    pub id: Uuid,
    pub file_name: String,
    pub source: SourceRef,
    pub state: ItemState,
    pub added_at: DateTime<Utc>,
}

impl Item {
    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Generated metadata, present only when done.
    pub fn metadata(&self) -> Option<&Metadata> {
        match &self.state {
            ItemState::Done { metadata } => Some(metadata),
            _ => None,
        }
    }

    /// Failure message, present only when failed.
    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            ItemState::Error { message } => Some(message),
            _ => None,
        }
    }
}

/// Per-state counts for progress display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProgressStats {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

impl ProgressStats {
    /// Share of items that are done, 0–100.
    pub fn percent_done(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.done as f64 / self.total as f64 * 100.0
        }
    }

    /// Items a batch run would pick up.
    pub fn eligible(&self) -> usize {
        self.pending + self.error
    }
}

/// Thread-safe, insertion-ordered collection of items.
#[derive(Debug, Default)]
pub struct ItemRegistry {
    items: Mutex<Vec<Item>>,
}

impl ItemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Item>> {
        // State stays consistent between statements, so a poisoned lock is usable.
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a new item in `Pending` state.
    pub fn add(&self, file_name: impl Into<String>, source: SourceRef) -> Uuid {
        let item = Item {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            source,
            state: ItemState::Pending,
            added_at: Utc::now(),
        };
        let id = item.id;
        self.lock().push(item);
        id
    }

    /// Track a file on disk, named after its file name.
    pub fn add_path(&self, path: &Path) -> Uuid {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        self.add(file_name, SourceRef::File(path.to_path_buf()))
    }

    pub fn get(&self, id: Uuid) -> Option<Item> {
        self.lock().iter().find(|item| item.id == id).cloned()
    }

    /// Copy of every item in insertion order.
    pub fn snapshot(&self) -> Vec<Item> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Ids of items currently in any of `kinds`, in insertion order.
    pub fn ids_in(&self, kinds: &[StateKind]) -> Vec<Uuid> {
        self.lock()
            .iter()
            .filter(|item| kinds.contains(&item.kind()))
            .map(|item| item.id)
            .collect()
    }

    /// Items that reached `Done`, in insertion order.
    pub fn done(&self) -> Vec<Item> {
        self.lock()
            .iter()
            .filter(|item| item.kind() == StateKind::Done)
            .cloned()
            .collect()
    }

    /// Move one item to `Processing`, clearing any previous result.
    ///
    /// Any non-processing state may start; an item already processing is
    /// rejected with [`BatchError::ItemBusy`].
    pub fn begin(&self, id: Uuid) -> Result<SourceRef, BatchError> {
        let mut items = self.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(BatchError::ItemNotFound(id))?;
        if item.kind() == StateKind::Processing {
            return Err(BatchError::ItemBusy(id));
        }
        item.state = ItemState::Processing;
        Ok(item.source.clone())
    }

    /// Move a whole group to `Processing` under one lock.
    ///
    /// Only items still in one of `kinds` are claimed. Items that vanished or
    /// changed state since the group was planned are skipped; the returned
    /// list holds exactly the items this call claimed.
    pub fn begin_group(&self, ids: &[Uuid], kinds: &[StateKind]) -> Vec<(Uuid, SourceRef)> {
        let mut items = self.lock();
        let mut claimed = Vec::with_capacity(ids.len());
        for id in ids {
            match items.iter_mut().find(|item| item.id == *id) {
                Some(item) if kinds.contains(&item.kind()) => {
                    item.state = ItemState::Processing;
                    claimed.push((*id, item.source.clone()));
                }
                Some(item) => tracing::warn!("Skipping {id}: now {:?}", item.kind()),
                None => tracing::warn!("Skipping {id}: removed before dispatch"),
            }
        }
        claimed
    }

    /// Record a successful result. Only valid from `Processing`.
    pub fn complete(&self, id: Uuid, metadata: Metadata) -> Result<(), BatchError> {
        self.finish(id, ItemState::Done { metadata })
    }

    /// Record a failure. Only valid from `Processing`.
    pub fn fail(&self, id: Uuid, message: impl Into<String>) -> Result<(), BatchError> {
        self.finish(
            id,
            ItemState::Error {
                message: message.into(),
            },
        )
    }

    fn finish(&self, id: Uuid, next: ItemState) -> Result<(), BatchError> {
        let mut items = self.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(BatchError::ItemNotFound(id))?;
        if item.kind() != StateKind::Processing {
            return Err(BatchError::InvalidTransition {
                id,
                from: item.kind(),
                to: next.kind(),
            });
        }
        item.state = next;
        Ok(())
    }

    /// Send a finished item back to `Pending` for explicit re-processing.
    pub fn reset(&self, id: Uuid) -> Result<(), BatchError> {
        let mut items = self.lock();
        let item = items
            .iter_mut()
            .find(|item| item.id == id)
            .ok_or(BatchError::ItemNotFound(id))?;
        if item.kind() == StateKind::Processing {
            return Err(BatchError::ItemBusy(id));
        }
        item.state = ItemState::Pending;
        Ok(())
    }

    pub fn remove(&self, id: Uuid) -> Option<Item> {
        let mut items = self.lock();
        let index = items.iter().position(|item| item.id == id)?;
        Some(items.remove(index))
    }

    /// Drop every item, returning how many were removed.
    pub fn clear(&self) -> usize {
        let mut items = self.lock();
        let count = items.len();
        items.clear();
        count
    }

    pub fn stats(&self) -> ProgressStats {
        let items = self.lock();
        let mut stats = ProgressStats {
            total: items.len(),
            ..ProgressStats::default()
        };
        for item in items.iter() {
            match item.kind() {
                StateKind::Pending => stats.pending += 1,
                StateKind::Processing => stats.processing += 1,
                StateKind::Done => stats.done += 1,
                StateKind::Error => stats.error += 1,
            }
        }
        stats
    }
}
