//! Passphrase-derived key chain

use std::sync::RwLock;

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as BASE64URL, Engine as _};
use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;

use crate::protocol::constants::{CHANNEL_ID_INFO, MESSAGE_KEY_INFO, PBKDF2_ITERATIONS};

/// Master key length in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// Holds the master secret derived from the shared passphrase and hands out
/// purpose-specific subkeys. Both devices run the same derivation from the
/// same passphrase, so every derived value matches on both sides.
pub struct KeyChain {
    master: RwLock<Option<[u8; KEY_SIZE]>>,
}

impl std::fmt::Debug for KeyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyChain")
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl KeyChain {
    pub fn new() -> Self {
        Self {
            master: RwLock::new(None),
        }
    }

    /// Derive the master key from a passphrase and salt.
    ///
    /// Idempotent; calling again replaces the key. An empty passphrase or
    /// salt leaves the chain unready rather than installing a weak key.
    pub fn setup(&self, passphrase: &str, salt: &[u8]) {
        if passphrase.is_empty() || salt.is_empty() {
            tracing::warn!("key setup with empty passphrase or salt, key chain stays unready");
            if let Ok(mut master) = self.master.write() {
                *master = None;
            }
            return;
        }

        let mut key = [0u8; KEY_SIZE];
        pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);

        if let Ok(mut master) = self.master.write() {
            *master = Some(key);
        }
    }

    /// True iff a master key is present
    pub fn is_ready(&self) -> bool {
        self.master.read().map(|m| m.is_some()).unwrap_or(false)
    }

    /// HKDF-SHA256 expand of `len` bytes under a domain-specific info string.
    ///
    /// IKM is the master key, the salt is a fixed all-zero hash-length block,
    /// so derived values are independent per info string. Returns `None`
    /// while the chain is unready.
    pub fn derive(&self, info: &str, len: usize) -> Option<Vec<u8>> {
        let master = (*self.master.read().ok()?)?;
        let hkdf = Hkdf::<Sha256>::new(Some(&[0u8; KEY_SIZE]), &master);
        let mut okm = vec![0u8; len];
        hkdf.expand(info.as_bytes(), &mut okm).ok()?;
        Some(okm)
    }

    /// Subkey used to seal and open control messages
    pub fn message_key(&self) -> Option<[u8; KEY_SIZE]> {
        let okm = self.derive(MESSAGE_KEY_INFO, KEY_SIZE)?;
        okm.try_into().ok()
    }

    /// Deterministic identifier both passphrase holders agree on; used as
    /// the discovery instance name and the endpoint confirmation banner.
    pub fn channel_id(&self) -> Option<String> {
        let bytes = self.derive(CHANNEL_ID_INFO, 16)?;
        Some(BASE64URL.encode(bytes))
    }
}

impl Default for KeyChain {
    fn default() -> Self {
        Self::new()
    }
}
