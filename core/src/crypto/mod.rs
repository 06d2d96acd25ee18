//! Cryptographic primitives for Airlift
//!
//! - PBKDF2-HMAC-SHA256 to stretch the shared passphrase into a master key
//! - HKDF-SHA256 to expand per-purpose subkeys from the master key
//! - AES-256-GCM for authenticated encryption of control messages

mod encryption;
mod envelope;
mod keys;

pub use encryption::{decrypt, encrypt, NONCE_SIZE, TAG_SIZE};
pub use keys::{KeyChain, KEY_SIZE};
