//! Sealing and opening of control-channel messages

use crate::crypto::encryption::{decrypt, encrypt};
use crate::crypto::keys::KeyChain;
use crate::protocol::{now_ms, Message};
use crate::{Error, Result};

impl KeyChain {
    /// Serialize and encrypt a message under the message subkey
    pub fn seal_message(&self, message: &Message) -> Result<Vec<u8>> {
        let key = self
            .message_key()
            .ok_or_else(|| Error::NotReady("key chain has no master key".to_string()))?;
        let plaintext = message.to_wire()?;
        encrypt(&plaintext, &key)
    }

    /// Decrypt and parse one received control unit.
    ///
    /// Returns `None` on a missing key, authentication failure, malformed
    /// plaintext, or a stale timestamp. All of these are expected wire noise
    /// and drop silently at debug level.
    pub fn open_message(&self, unit: &[u8], peer_address: Option<&str>) -> Option<Message> {
        let key = self.message_key()?;
        let plaintext = decrypt(unit, &key)?;

        let message = match Message::from_wire(&plaintext, peer_address) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!("dropping malformed control unit: {}", e);
                return None;
            }
        };

        if !message.is_fresh(now_ms()) {
            tracing::debug!(id = %message.id, "dropping stale control message");
            return None;
        }

        Some(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageKind;

    fn ready_chain() -> KeyChain {
        let chain = KeyChain::new();
        chain.setup("shared secret", b"salt");
        chain
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let chain = ready_chain();
        let msg = Message::new(MessageKind::Clipboard, "copied text".to_string());

        let unit = chain.seal_message(&msg).unwrap();
        let opened = chain.open_message(&unit, Some("peer-1")).unwrap();

        assert_eq!(opened.kind, MessageKind::Clipboard);
        assert_eq!(opened.value, "copied text");
        assert_eq!(opened.id, msg.id);
        assert_eq!(opened.peer_address.as_deref(), Some("peer-1"));
    }

    #[test]
    fn test_seal_requires_key() {
        let chain = KeyChain::new();
        let msg = Message::new(MessageKind::Clipboard, "x".to_string());
        assert!(chain.seal_message(&msg).is_err());
    }

    #[test]
    fn test_open_with_wrong_passphrase_fails() {
        let sender = ready_chain();
        let unit = sender
            .seal_message(&Message::new(MessageKind::Clipboard, "x".to_string()))
            .unwrap();

        let receiver = KeyChain::new();
        receiver.setup("different secret", b"salt");
        assert!(receiver.open_message(&unit, None).is_none());
    }

    #[test]
    fn test_open_tampered_unit_fails() {
        let chain = ready_chain();
        let mut unit = chain
            .seal_message(&Message::new(MessageKind::Clipboard, "x".to_string()))
            .unwrap();
        let last = unit.len() - 1;
        unit[last] ^= 0xff;
        assert!(chain.open_message(&unit, None).is_none());
    }

    #[test]
    fn test_stale_message_dropped() {
        let chain = ready_chain();

        let mut msg = Message::new(MessageKind::Clipboard, "old".to_string());
        msg.timestamp_ms = now_ms() - 61_000;
        let unit = chain.seal_message(&msg).unwrap();
        assert!(chain.open_message(&unit, None).is_none());

        let mut msg = Message::new(MessageKind::Clipboard, "recent".to_string());
        msg.timestamp_ms = now_ms() - 59_000;
        let unit = chain.seal_message(&msg).unwrap();
        assert!(chain.open_message(&unit, None).is_some());
    }
}
