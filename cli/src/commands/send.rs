//! Send command implementation.

use std::path::PathBuf;
use std::sync::Arc;

use airlift_core::broker::{Broker, Collaborators};
use airlift_core::control::TcpControlChannel;
use airlift_core::{Config, DeviceIdentity, KeyChain};

use crate::commands::resolve_passphrase;

/// Send one file to the peer and exit.
pub async fn send_file(
    device_name: String,
    passphrase: Option<String>,
    salt: String,
    file: PathBuf,
    peer: String,
) -> anyhow::Result<()> {
    let passphrase = resolve_passphrase(passphrase)?;

    let keys = Arc::new(KeyChain::new());
    keys.setup(&passphrase, salt.as_bytes());
    let channel_id = keys
        .channel_id()
        .ok_or_else(|| anyhow::anyhow!("key derivation failed"))?;

    let config = Config {
        // One-shot sender; no inbound server port to hold
        stream_port: 0,
        ..Config::default()
    };

    let channel = Arc::new(TcpControlChannel::new(channel_id));
    let mut broker = Broker::new(
        DeviceIdentity::new(device_name),
        config,
        keys,
        channel,
        Collaborators::default(),
    );
    let _items = broker.start().await?;

    broker.connect(&peer).await?;
    let transfer = broker.send_file(&file).await?;
    println!(
        "\x1b[1;32m✓\x1b[0m Sent {} ({} bytes)",
        transfer.name, transfer.total_size
    );

    broker.shutdown().await;
    Ok(())
}
