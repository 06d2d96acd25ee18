//! Seams for host-platform collaborators
//!
//! The broker talks to the host system only through these traits, so the
//! CLI, a desktop shell, or a test can each wire in their own
//! implementations. Defaults suitable for a plain desktop process are
//! provided alongside.

use std::path::Path;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::protocol::Transfer;
use crate::{Error, Result};

/// Writes received text into the system clipboard
pub trait ClipboardSink: Send + Sync {
    fn write_text(&self, text: &str) -> Result<()>;
}

/// Opens local files for outbound transfer
#[async_trait]
pub trait FileProvider: Send + Sync {
    /// A readable stream over the file plus its total size in bytes
    async fn open(&self, path: &Path) -> Result<(Box<dyn AsyncRead + Send + Unpin>, u64)>;
}

/// Surfaces offers and progress to the host notification system
pub trait NotificationSink: Send + Sync {
    fn transfer_offered(&self, transfer: &Transfer);
    fn transfer_finished(&self, transfer: &Transfer);
}

/// Keeps the host awake for the duration of a long transfer; the guard
/// releases on drop
pub trait WakeLock: Send + Sync {
    fn acquire(&self, reason: &str) -> Box<dyn WakeGuard>;
}

pub trait WakeGuard: Send {}

/// Plain filesystem file provider
pub struct FsFileProvider;

#[async_trait]
impl FileProvider for FsFileProvider {
    async fn open(&self, path: &Path) -> Result<(Box<dyn AsyncRead + Send + Unpin>, u64)> {
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(Error::Storage(format!("{} is not a file", path.display())));
        }
        let file = tokio::fs::File::open(path).await?;
        Ok((Box::new(file), metadata.len()))
    }
}

/// Notification sink that only logs
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn transfer_offered(&self, transfer: &Transfer) {
        tracing::info!(id = %transfer.id, name = %transfer.name, size = transfer.total_size, "incoming transfer offered");
    }

    fn transfer_finished(&self, transfer: &Transfer) {
        tracing::info!(id = %transfer.id, status = ?transfer.status, "transfer finished");
    }
}

/// Wake lock for hosts without power management
pub struct NoopWakeLock;

struct NoopGuard;

impl WakeGuard for NoopGuard {}

impl WakeLock for NoopWakeLock {
    fn acquire(&self, reason: &str) -> Box<dyn WakeGuard> {
        tracing::debug!("wake lock acquired: {}", reason);
        Box::new(NoopGuard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_fs_file_provider_reads_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        tokio::fs::write(&path, b"abcdef").await.unwrap();

        let (mut reader, size) = FsFileProvider.open(&path).await.unwrap();
        assert_eq!(size, 6);

        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.unwrap();
        assert_eq!(content, b"abcdef");
    }

    #[tokio::test]
    async fn test_fs_file_provider_rejects_directories() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FsFileProvider.open(dir.path()).await.is_err());
    }
}
