//! Run command implementation.

use std::sync::Arc;
use std::time::Duration;

use airlift_core::broker::{Broker, Collaborators};
use airlift_core::control::TcpControlChannel;
use airlift_core::discovery::{DiscoveryEvent, DiscoveryService};
use airlift_core::protocol::constants::CLIPBOARD_POLL_INTERVAL_MS;
use airlift_core::{clipboard, Config, DeviceIdentity, KeyChain, Transfer, TransferStatus};

use crate::commands::resolve_passphrase;
use crate::process::kill_previous_instances;
use crate::ui::print_banner;

/// Run the sync service.
pub async fn run_service(
    device_name: String,
    passphrase: Option<String>,
    salt: String,
    peer: Option<String>,
) -> anyhow::Result<()> {
    kill_previous_instances();
    print_banner();

    let passphrase = resolve_passphrase(passphrase)?;

    let keys = Arc::new(KeyChain::new());
    keys.setup(&passphrase, salt.as_bytes());
    let channel_id = keys
        .channel_id()
        .ok_or_else(|| anyhow::anyhow!("key derivation failed"))?;

    let identity = DeviceIdentity::new(device_name);
    let channel = Arc::new(TcpControlChannel::new(channel_id.clone()));
    let mut broker = Broker::new(
        identity.clone(),
        Config::default(),
        keys,
        channel,
        Collaborators::default(),
    );
    let mut items = broker.start().await?;

    println!("\x1b[1mDevice:\x1b[0m {}", identity.name);
    println!("\x1b[1mID:\x1b[0m     {}", identity.id);

    // Replay what the last session left behind
    let entries = broker.history().await?;
    if !entries.is_empty() {
        println!("\n\x1b[1mRecent items:\x1b[0m");
        for entry in entries.iter().rev().take(5) {
            let direction = if entry.outgoing { "→" } else { "←" };
            println!("  {} {:?} {}", direction, entry.kind, entry.name);
        }
    }

    // Advertise our stream endpoint under the derived identifier
    let discovery = DiscoveryService::new(identity.id, channel_id)?;
    if let Some(port) = broker.stream_port() {
        discovery.register(&identity.name, port)?;
    }
    let mut discovered = discovery.browse()?;

    if let Some(address) = &peer {
        broker.connect(address).await?;
    }

    // Local clipboard changes go out as control messages
    let (mut clip_rx, _clip_handle) =
        clipboard::start_monitor(Duration::from_millis(CLIPBOARD_POLL_INTERVAL_MS));

    println!("\n\x1b[1;32m✓\x1b[0m Listening for the peer and clipboard changes...");
    println!("\x1b[2mPress Ctrl+C to stop.\x1b[0m\n");

    // Handle Ctrl+C gracefully
    let (tx, mut shutdown_rx) = tokio::sync::mpsc::channel::<()>(1);
    ctrlc::set_handler(move || {
        let _ = tx.blocking_send(());
    })?;

    loop {
        tokio::select! {
            Some(item) = items.recv() => {
                print_item(&item);
            }
            Some(text) = clip_rx.recv() => {
                let _ = broker.send_text(&text).await;
            }
            Some(event) = discovered.recv() => {
                match event {
                    DiscoveryEvent::PeerFound(info) => {
                        println!("\x1b[1;32m⬤\x1b[0m Found peer: \x1b[1m{}\x1b[0m", info.device_name);
                        if let Some(addr) = info.addresses.first() {
                            broker.set_peer_stream_addr((*addr, info.port).into());
                        }
                    }
                    DiscoveryEvent::PeerLost(id) => {
                        println!("\x1b[1;31m⬤\x1b[0m Lost peer: {}", id);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                println!("\n\x1b[1;33mShutting down...\x1b[0m");
                break;
            }
        }
    }

    broker.shutdown().await;
    let _ = discovery.shutdown();
    Ok(())
}

/// Print one item from the broker's stream.
fn print_item(item: &Transfer) {
    let direction = if item.outgoing { "📤" } else { "📋" };
    match item.status {
        TransferStatus::Pending => {}
        TransferStatus::Active => {
            println!("{} {} … {}%", direction, item.name, item.progress());
        }
        TransferStatus::Completed => {
            println!("{} {:?} complete ({} bytes)", direction, item.kind, item.total_size);
        }
        TransferStatus::Error => {
            eprintln!(
                "\x1b[1;31m✗\x1b[0m {} failed: {}",
                item.name,
                item.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}
