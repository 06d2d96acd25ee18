//! Unified transfer-progress records
//!
//! A [`Transfer`] represents any exchanged item, text or blob, for
//! presentation and history purposes. It is created and mutated only by
//! the broker and blob assembly; consumers get read-only clones.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::messages::{now_ms, BlobInfo};

/// Content category of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadKind {
    Text,
    File,
    Image,
}

impl PayloadKind {
    /// Pick File or Image from a file name extension
    pub fn for_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" | "heic" => PayloadKind::Image,
            _ => PayloadKind::File,
        }
    }
}

/// Lifecycle of a transfer record; terminal states never change again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    Pending,
    Active,
    Completed,
    Error,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Error)
    }
}

/// Final content of a finished transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferData {
    /// The text itself
    Text(String),
    /// Path of the stored artifact
    Stored(PathBuf),
}

/// Progress record for one exchanged item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: String,
    pub timestamp_ms: u64,
    pub outgoing: bool,
    pub status: TransferStatus,
    pub name: String,
    pub kind: PayloadKind,
    pub total_size: u64,
    pub current_size: u64,
    /// Set only when `status` is [`TransferStatus::Error`]
    pub error: Option<String>,
    pub data: Option<TransferData>,
}

impl Transfer {
    /// A text item; text exchanges carry their whole payload in one unit
    pub fn text(content: &str, outgoing: bool) -> Self {
        let size = content.len() as u64;
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp_ms: now_ms(),
            outgoing,
            status: TransferStatus::Completed,
            name: String::new(),
            kind: PayloadKind::Text,
            total_size: size,
            current_size: size,
            error: None,
            data: Some(TransferData::Text(content.to_string())),
        }
    }

    /// A blob item, starting out pending
    pub fn blob(info: &BlobInfo, outgoing: bool) -> Self {
        Self {
            id: info.id.clone(),
            timestamp_ms: now_ms(),
            outgoing,
            status: TransferStatus::Pending,
            name: info.name.clone(),
            kind: info.kind,
            total_size: info.total_size,
            current_size: 0,
            error: None,
            data: None,
        }
    }

    /// Completion percentage, 0-100
    pub fn progress(&self) -> u8 {
        if self.total_size == 0 {
            return if self.status == TransferStatus::Completed { 100 } else { 0 };
        }
        ((self.current_size * 100 / self.total_size).min(100)) as u8
    }

    /// Move from Pending to Active; ignored elsewhere
    pub fn activate(&mut self) {
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Active;
        }
    }

    /// Record progress; current_size is monotone until a terminal state
    pub fn advance_to(&mut self, current: u64) {
        if !self.status.is_terminal() {
            self.current_size = self.current_size.max(current);
        }
    }

    /// Terminal success
    pub fn complete(&mut self, data: Option<TransferData>) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Completed;
            self.current_size = self.current_size.max(self.total_size);
            self.data = data;
        }
    }

    /// Terminal failure
    pub fn fail(&mut self, error: impl Into<String>) {
        if !self.status.is_terminal() {
            self.status = TransferStatus::Error;
            self.error = Some(error.into());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_blob() -> Transfer {
        Transfer::blob(
            &BlobInfo {
                id: "b1".to_string(),
                name: "x.bin".to_string(),
                kind: PayloadKind::File,
                total_size: 200,
            },
            false,
        )
    }

    #[test]
    fn test_progress_derivation() {
        let mut t = sample_blob();
        assert_eq!(t.progress(), 0);

        t.activate();
        t.advance_to(50);
        assert_eq!(t.progress(), 25);

        t.complete(None);
        assert_eq!(t.progress(), 100);
        assert_eq!(t.current_size, 200);
    }

    #[test]
    fn test_current_size_monotone() {
        let mut t = sample_blob();
        t.activate();
        t.advance_to(100);
        t.advance_to(40);
        assert_eq!(t.current_size, 100);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut t = sample_blob();
        t.fail("connection lost");
        assert_eq!(t.status, TransferStatus::Error);

        t.complete(None);
        t.activate();
        t.advance_to(999);
        assert_eq!(t.status, TransferStatus::Error);
        assert_eq!(t.current_size, 0);
        assert_eq!(t.error.as_deref(), Some("connection lost"));
    }

    #[test]
    fn test_text_transfer_is_complete_at_creation() {
        let t = Transfer::text("hello", true);
        assert_eq!(t.status, TransferStatus::Completed);
        assert_eq!(t.progress(), 100);
        assert_eq!(t.data, Some(TransferData::Text("hello".to_string())));
    }

    #[test]
    fn test_kind_for_name() {
        assert_eq!(PayloadKind::for_name("photo.JPG"), PayloadKind::Image);
        assert_eq!(PayloadKind::for_name("notes.txt"), PayloadKind::File);
        assert_eq!(PayloadKind::for_name("noext"), PayloadKind::File);
    }
}
