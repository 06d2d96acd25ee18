//! Bounded, persisted history of exchanged items
//!
//! The whole in-memory queue is serialized and the store file rewritten on
//! every mutation; `max_entries` bounds the queue, so rewrites stay small.
//! The store loads once in the background at construction and `retrieve`
//! suspends until that load finishes.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};

use crate::protocol::{PayloadKind, Transfer, TransferData, TransferStatus};

/// Persisted record of one exchanged item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: String,
    pub timestamp_ms: u64,
    pub outgoing: bool,
    pub status: TransferStatus,
    pub kind: PayloadKind,
    pub name: String,
    pub total_size: u64,
    pub data: Option<TransferData>,
}

impl From<&Transfer> for HistoryEntry {
    fn from(transfer: &Transfer) -> Self {
        Self {
            id: transfer.id.clone(),
            timestamp_ms: transfer.timestamp_ms,
            outgoing: transfer.outgoing,
            status: transfer.status,
            kind: transfer.kind,
            name: transfer.name.clone(),
            total_size: transfer.total_size,
            data: transfer.data.clone(),
        }
    }
}

/// Append-only, size-bounded item log backed by one JSON file
pub struct History {
    entries: Arc<Mutex<VecDeque<HistoryEntry>>>,
    /// Serializes mutate+persist pairs so trim and rewrite stay atomic
    /// relative to each other
    writer: Mutex<()>,
    loaded: watch::Receiver<bool>,
    store_path: PathBuf,
    max_entries: usize,
}

impl History {
    /// Open the history and start loading the persisted store in the
    /// background. Must be called within a tokio runtime.
    pub fn open(store_path: PathBuf, max_entries: usize) -> Self {
        let entries = Arc::new(Mutex::new(VecDeque::new()));
        let (loaded_tx, loaded_rx) = watch::channel(false);

        let load_entries = entries.clone();
        let load_path = store_path.clone();
        tokio::spawn(async move {
            let loaded = load_store(&load_path, max_entries).await;
            if !loaded.is_empty() {
                *load_entries.lock().await = loaded;
            }
            let _ = loaded_tx.send(true);
        });

        Self {
            entries,
            writer: Mutex::new(()),
            loaded: loaded_rx,
            store_path,
            max_entries,
        }
    }

    /// Append an entry, evicting oldest-first past the bound, then rewrite
    /// the persisted store. Persistence failures are logged, never
    /// propagated; memory stays authoritative.
    pub async fn add(&self, entry: HistoryEntry) {
        self.wait_loaded().await;
        let _writer = self.writer.lock().await;

        let snapshot: Vec<HistoryEntry> = {
            let mut entries = self.entries.lock().await;
            entries.push_back(entry);
            while entries.len() > self.max_entries {
                entries.pop_front();
            }
            entries.iter().cloned().collect()
        };

        if let Err(e) = write_store(&self.store_path, &snapshot).await {
            tracing::warn!("history persist failed: {}", e);
        }
    }

    /// Current contents, oldest first. Suspends until the initial load is
    /// done.
    pub async fn retrieve(&self) -> Vec<HistoryEntry> {
        self.wait_loaded().await;
        self.entries.lock().await.iter().cloned().collect()
    }

    /// Empty the memory queue and delete the persisted store
    pub async fn clear(&self) {
        self.wait_loaded().await;
        let _writer = self.writer.lock().await;

        self.entries.lock().await.clear();
        match tokio::fs::remove_file(&self.store_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("history store delete failed: {}", e),
        }
    }

    async fn wait_loaded(&self) {
        let mut loaded = self.loaded.clone();
        let _ = loaded.wait_for(|done| *done).await;
    }
}

/// Read the whole store once. A corrupt file is discarded and the history
/// starts empty; it never partially loads.
async fn load_store(path: &PathBuf, max_entries: usize) -> VecDeque<HistoryEntry> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("history store read failed: {}", e);
            }
            return VecDeque::new();
        }
    };

    match serde_json::from_slice::<Vec<HistoryEntry>>(&bytes) {
        Ok(list) => {
            let mut entries: VecDeque<HistoryEntry> = list.into();
            while entries.len() > max_entries {
                entries.pop_front();
            }
            entries
        }
        Err(e) => {
            tracing::warn!("discarding corrupt history store: {}", e);
            let _ = tokio::fs::remove_file(path).await;
            VecDeque::new()
        }
    }
}

async fn write_store(path: &PathBuf, entries: &[HistoryEntry]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_vec(entries)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::write(path, json).await
}
