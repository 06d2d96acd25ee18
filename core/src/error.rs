use thiserror::Error;

/// Airlift error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Failed to serialize/deserialize: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to encode/decode stream payload: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Transport not ready: {0}")]
    NotReady(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
