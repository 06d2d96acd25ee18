//! Reconstruction of received blobs into durable storage
//!
//! Chunks land in a staging file through a positioned write handle, so
//! out-of-order and resumed delivery both work. Finalization renames the
//! staging file into blob storage and optionally mirrors it into a
//! user-visible directory; until then no partial artifact is exposed.

use std::collections::HashMap;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::protocol::BlobInfo;
use crate::{Error, Result};

/// Assembles inbound blobs, at most one active session per blob id
pub struct BlobAssembly {
    staging_dir: PathBuf,
    storage_dir: PathBuf,
    mirror_dir: Option<PathBuf>,
    sessions: Mutex<HashMap<String, AssemblySession>>,
}

impl BlobAssembly {
    /// Create the staging and storage directories under `data_dir`
    pub async fn new(data_dir: &Path, mirror_dir: Option<PathBuf>) -> Result<Self> {
        let staging_dir = data_dir.join("staging");
        let storage_dir = data_dir.join("blobs");
        fs::create_dir_all(&staging_dir).await?;
        fs::create_dir_all(&storage_dir).await?;

        Ok(Self {
            staging_dir,
            storage_dir,
            mirror_dir,
            sessions: Mutex::new(HashMap::new()),
        })
    }

    /// Open an assembly session for an announced blob.
    ///
    /// A second open for an id with an active session supersedes it: the
    /// old session is dropped and its staging file discarded.
    pub async fn open(&self, info: BlobInfo) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        if let Some(old) = sessions.remove(&info.id) {
            tracing::warn!(id = %info.id, "superseding active assembly session");
            old.discard().await;
        }

        let session = AssemblySession::create(&self.staging_dir, info).await?;
        sessions.insert(session.info.id.clone(), session);
        Ok(())
    }

    /// Write a chunk at its offset; returns the total bytes received so far
    pub async fn write(&self, id: &str, offset: u64, data: &[u8]) -> Result<u64> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| Error::Protocol(format!("chunk for unknown blob {}", id)))?;
        session.write(offset, data).await?;
        Ok(session.received)
    }

    /// Whether all announced bytes have arrived
    pub async fn is_complete(&self, id: &str) -> bool {
        let sessions = self.sessions.lock().await;
        sessions
            .get(id)
            .map(|s| s.received >= s.info.total_size)
            .unwrap_or(false)
    }

    /// Close the handle and move the finished blob into durable storage.
    ///
    /// On failure the staging file stays behind for cleanup and no partial
    /// artifact appears in storage.
    pub async fn finalize(&self, id: &str) -> Result<PathBuf> {
        let session = self
            .sessions
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| Error::Storage(format!("no active session for blob {}", id)))?;
        session
            .finalize(&self.storage_dir, self.mirror_dir.as_deref())
            .await
    }

    /// Discard an active session and its staging file (cancel/error path)
    pub async fn cancel(&self, id: &str) {
        if let Some(session) = self.sessions.lock().await.remove(id) {
            session.discard().await;
        }
    }
}

/// One in-flight blob reconstruction
struct AssemblySession {
    file: File,
    staging_path: PathBuf,
    info: BlobInfo,
    received: u64,
}

impl AssemblySession {
    async fn create(staging_dir: &Path, info: BlobInfo) -> Result<Self> {
        let staging_path = staging_dir.join(format!("{}.part", Uuid::new_v4()));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .read(true)
            .open(&staging_path)
            .await
            .map_err(|e| Error::Storage(format!("cannot open staging file: {}", e)))?;

        Ok(Self {
            file,
            staging_path,
            info,
            received: 0,
        })
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(data).await?;
        self.received += data.len() as u64;
        Ok(())
    }

    async fn finalize(mut self, storage_dir: &Path, mirror_dir: Option<&Path>) -> Result<PathBuf> {
        self.file.flush().await?;
        drop(self.file);

        let file_name = format!("{}_{}", self.info.id, sanitize_name(&self.info.name));
        let final_path = storage_dir.join(&file_name);
        fs::rename(&self.staging_path, &final_path)
            .await
            .map_err(|e| Error::Storage(format!("cannot store blob {}: {}", self.info.id, e)))?;

        if let Some(dir) = mirror_dir {
            let mirror_path = dir.join(sanitize_name(&self.info.name));
            if let Err(e) = fs::copy(&final_path, &mirror_path).await {
                tracing::warn!("mirror copy to {:?} failed: {}", mirror_path, e);
            }
        }

        Ok(final_path)
    }

    async fn discard(self) {
        drop(self.file);
        if let Err(e) = fs::remove_file(&self.staging_path).await {
            tracing::debug!("staging file cleanup failed: {}", e);
        }
    }
}

/// Peers pick blob names; keep them from escaping the storage directory
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "blob".to_string()
    } else {
        cleaned
    }
}
