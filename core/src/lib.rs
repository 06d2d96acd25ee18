//! Airlift Core - secure dual-transport device sync engine
//!
//! This library pairs a mobile companion with a desktop peer through a
//! passphrase-derived shared secret and moves two kinds of payloads
//! between them: small encrypted control messages (clipboard text, device
//! names, file announcements) over a low-throughput control channel, and
//! file blobs over a length-prefixed, keepalive-guarded stream channel.

pub mod assembly;
pub mod broker;
pub mod clipboard;
pub mod control;
pub mod crypto;
pub mod discovery;
pub mod history;
pub mod platform;
pub mod protocol;
pub mod stream;

mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

/// Device identity: a stable id plus the advertised name
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub id: uuid::Uuid,
    pub name: String,
}

impl DeviceIdentity {
    pub fn new(name: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            name,
        }
    }
}

/// Configuration for the broker
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the local stream server binds (0 picks a free port)
    pub stream_port: u16,
    /// Port the peer's stream server is expected on when discovery has not
    /// resolved one
    pub peer_stream_port: u16,
    /// Path for staging files, blob storage, and the history store
    pub data_dir: PathBuf,
    /// User-visible directory finished blobs are mirrored into
    pub mirror_dir: Option<PathBuf>,
    /// Bound on the persisted history
    pub max_history: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stream_port: protocol::constants::DEFAULT_STREAM_PORT,
            peer_stream_port: protocol::constants::DEFAULT_STREAM_PORT,
            data_dir: dirs_home().join(".airlift"),
            mirror_dir: dirs::download_dir(),
            max_history: protocol::constants::DEFAULT_MAX_HISTORY,
        }
    }
}

fn dirs_home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// Re-export key types for convenience
pub use broker::{Broker, BrokerState, Collaborators, ConnectionPhase};
pub use crypto::KeyChain;
pub use discovery::PeerInfo;
pub use history::HistoryEntry;
pub use protocol::{Message, PayloadKind, Transfer, TransferData, TransferStatus};
