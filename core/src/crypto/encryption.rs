//! Authenticated encryption using AES-256-GCM

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::crypto::keys::KEY_SIZE;
use crate::{Error, Result};

/// GCM nonce length in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// GCM authentication tag length in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Encrypt with a fresh random nonce.
///
/// Output layout: `[12-byte nonce][ciphertext][16-byte tag]`.
pub fn encrypt(plaintext: &[u8], key: &[u8; KEY_SIZE]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| Error::Crypto(format!("invalid key: {}", e)))?;

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| Error::Crypto(format!("encryption failed: {}", e)))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a `nonce‖ciphertext‖tag` blob.
///
/// Returns `None` on any length mismatch or authentication failure; crypto
/// errors never propagate past this boundary.
pub fn decrypt(blob: &[u8], key: &[u8; KEY_SIZE]) -> Option<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return None;
    }

    let cipher = Aes256Gcm::new_from_slice(key).ok()?;
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    cipher
        .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
        .ok()
}
