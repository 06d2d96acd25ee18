//! Control-channel message definitions

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::protocol::constants::MAX_MESSAGE_AGE_MS;
use crate::protocol::transfer::PayloadKind;
use crate::{Error, Result};

/// Kind of a control-channel unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Clipboard text from one side to the other
    Clipboard,
    /// The sender's human-readable device name
    DeviceName,
    /// Metadata for a blob about to arrive on the stream channel
    FileAnnounce,
}

impl MessageKind {
    /// Wire code for the `t` field
    pub fn code(self) -> u8 {
        match self {
            MessageKind::Clipboard => 1,
            MessageKind::DeviceName => 2,
            MessageKind::FileAnnounce => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(MessageKind::Clipboard),
            2 => Some(MessageKind::DeviceName),
            3 => Some(MessageKind::FileAnnounce),
            _ => None,
        }
    }
}

/// One small message exchanged over the control channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    /// String payload: clipboard text, device name, or blob metadata JSON
    pub value: String,
    /// Filled in locally on receipt, never transmitted
    pub peer_address: Option<String>,
    pub id: Uuid,
    /// Creation time, UNIX milliseconds
    pub timestamp_ms: u64,
}

impl Message {
    pub fn new(kind: MessageKind, value: String) -> Self {
        Self {
            kind,
            value,
            peer_address: None,
            id: Uuid::new_v4(),
            timestamp_ms: now_ms(),
        }
    }

    /// Serialize to the wire shape (JSON, for cross-platform compatibility)
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        let wire = WireMessage {
            t: self.kind.code(),
            p: self.value.clone(),
            id: self.id,
            ts: self.timestamp_ms,
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Parse a wire unit, stamping the local peer address
    pub fn from_wire(bytes: &[u8], peer_address: Option<&str>) -> Result<Self> {
        let wire: WireMessage = serde_json::from_slice(bytes)?;
        let kind = MessageKind::from_code(wire.t)
            .ok_or_else(|| Error::InvalidMessage(format!("unknown type code {}", wire.t)))?;
        Ok(Self {
            kind,
            value: wire.p,
            peer_address: peer_address.map(|a| a.to_string()),
            id: wire.id,
            timestamp_ms: wire.ts,
        })
    }

    /// Staleness/replay guard: the message timestamp must be within
    /// [`MAX_MESSAGE_AGE_MS`] of the local clock, in either direction.
    pub fn is_fresh(&self, now_ms: u64) -> bool {
        now_ms.abs_diff(self.timestamp_ms) <= MAX_MESSAGE_AGE_MS
    }
}

/// JSON shape of one control unit before encryption:
/// `{"t": <type code>, "p": <payload>, "id": ..., "ts": ...}`
#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    t: u8,
    p: String,
    id: Uuid,
    ts: u64,
}

/// Blob metadata carried in the `value` of a FILE_ANNOUNCE message and in
/// the announcement frame on the stream channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: String,
    pub name: String,
    pub kind: PayloadKind,
    pub total_size: u64,
}

impl BlobInfo {
    pub fn to_value(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_value(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

/// Current time as UNIX milliseconds
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_roundtrip() {
        let msg = Message::new(MessageKind::Clipboard, "hello".to_string());
        let bytes = msg.to_wire().unwrap();

        let decoded = Message::from_wire(&bytes, Some("aa:bb")).unwrap();
        assert_eq!(decoded.kind, MessageKind::Clipboard);
        assert_eq!(decoded.value, "hello");
        assert_eq!(decoded.id, msg.id);
        assert_eq!(decoded.timestamp_ms, msg.timestamp_ms);
        assert_eq!(decoded.peer_address.as_deref(), Some("aa:bb"));
    }

    #[test]
    fn test_peer_address_not_transmitted() {
        let mut msg = Message::new(MessageKind::DeviceName, "desk".to_string());
        msg.peer_address = Some("should-not-leak".to_string());

        let json = String::from_utf8(msg.to_wire().unwrap()).unwrap();
        assert!(!json.contains("should-not-leak"));
    }

    #[test]
    fn test_unknown_type_code_rejected() {
        let raw = br#"{"t":9,"p":"x","id":"7f2c1a70-0000-0000-0000-000000000000","ts":1}"#;
        assert!(Message::from_wire(raw, None).is_err());
    }

    #[test]
    fn test_freshness_window() {
        let mut msg = Message::new(MessageKind::Clipboard, "x".to_string());
        let now = now_ms();

        msg.timestamp_ms = now - 59_000;
        assert!(msg.is_fresh(now));

        msg.timestamp_ms = now - 61_000;
        assert!(!msg.is_fresh(now));

        // A timestamp from the future is just as suspect
        msg.timestamp_ms = now + 61_000;
        assert!(!msg.is_fresh(now));
    }

    #[test]
    fn test_blob_info_value_roundtrip() {
        let info = BlobInfo {
            id: "b1".to_string(),
            name: "report.pdf".to_string(),
            kind: PayloadKind::File,
            total_size: 1024,
        };
        let value = info.to_value().unwrap();
        assert_eq!(BlobInfo::from_value(&value).unwrap(), info);
    }
}
