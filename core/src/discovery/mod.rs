//! mDNS discovery gated on the derived channel identifier
//!
//! The peer advertises its stream port with the key-derived channel
//! identifier in its TXT records. Browsing only surfaces services carrying
//! the same identifier, so only holders of the same passphrase can
//! discover and address each other; everything else on the network is
//! invisible noise.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

use crate::protocol::constants::{PROTOCOL_VERSION, SERVICE_TYPE};
use crate::{Error, Result};

/// Information about a discovered peer
#[derive(Debug, Clone)]
pub struct PeerInfo {
    pub instance_id: Uuid,
    pub device_name: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

/// Event from the discovery service
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerFound(PeerInfo),
    PeerLost(Uuid),
}

/// mDNS discovery service
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    instance_id: Uuid,
    channel_id: String,
    peers: Arc<RwLock<HashMap<Uuid, PeerInfo>>>,
}

impl DiscoveryService {
    /// `channel_id` is the key-derived identifier both peers share
    pub fn new(instance_id: Uuid, channel_id: String) -> Result<Self> {
        let daemon = ServiceDaemon::new().map_err(|e| Error::Discovery(e.to_string()))?;

        Ok(Self {
            daemon,
            instance_id,
            channel_id,
            peers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Register our stream endpoint for the peer to discover
    pub fn register(&self, device_name: &str, port: u16) -> Result<()> {
        let instance_name = format!("{}-{}", device_name, &self.instance_id.to_string()[..8]);

        let mut properties = HashMap::new();
        properties.insert("iid".to_string(), self.instance_id.to_string());
        properties.insert("cid".to_string(), self.channel_id.clone());
        properties.insert("name".to_string(), device_name.to_string());
        properties.insert("v".to_string(), PROTOCOL_VERSION.to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!(
                "{}.local.",
                hostname::get()
                    .map(|h| h.to_string_lossy().to_string())
                    .unwrap_or_else(|_| "airlift".to_string())
            ),
            (),
            port,
            properties,
        )
        .map_err(|e| Error::Discovery(e.to_string()))?;

        self.daemon
            .register(service)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        tracing::info!("registered mDNS service: {}", instance_name);
        Ok(())
    }

    /// Start browsing for the peer, returns a channel of discovery events
    pub fn browse(&self) -> Result<mpsc::Receiver<DiscoveryEvent>> {
        let (tx, rx) = mpsc::channel(32);
        let peers = self.peers.clone();
        let our_id = self.instance_id;
        let our_channel = self.channel_id.clone();

        let receiver = self
            .daemon
            .browse(SERVICE_TYPE)
            .map_err(|e| Error::Discovery(e.to_string()))?;

        tokio::spawn(async move {
            while let Ok(event) = receiver.recv() {
                match event {
                    ServiceEvent::ServiceResolved(info) => {
                        let props = info.get_properties();

                        let channel = props
                            .get("cid")
                            .map(|v| v.val_str().to_string())
                            .unwrap_or_default();
                        let instance_id = props
                            .get("iid")
                            .and_then(|v| v.val_str().parse::<Uuid>().ok());
                        let device_name = props
                            .get("name")
                            .map(|v| v.val_str().to_string())
                            .unwrap_or_else(|| "Unknown".to_string());

                        // Not our pairing, or our own advertisement
                        if channel != our_channel {
                            continue;
                        }
                        let Some(id) = instance_id else { continue };
                        if id == our_id {
                            continue;
                        }

                        let peer = PeerInfo {
                            instance_id: id,
                            device_name,
                            addresses: info.get_addresses().iter().copied().collect(),
                            port: info.get_port(),
                        };

                        peers.write().await.insert(id, peer.clone());

                        if tx.send(DiscoveryEvent::PeerFound(peer)).await.is_err() {
                            break;
                        }
                    }
                    ServiceEvent::ServiceRemoved(_, fullname) => {
                        let mut peers_guard = peers.write().await;
                        let removed_id = peers_guard
                            .iter()
                            .find(|(_, p)| fullname.contains(&p.device_name))
                            .map(|(id, _)| *id);

                        if let Some(id) = removed_id {
                            peers_guard.remove(&id);
                            if tx.send(DiscoveryEvent::PeerLost(id)).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ => {}
                }
            }
        });

        Ok(rx)
    }

    /// Get currently known peers
    pub async fn get_peers(&self) -> Vec<PeerInfo> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Shutdown the discovery service
    pub fn shutdown(self) -> Result<()> {
        self.daemon
            .shutdown()
            .map_err(|e| Error::Discovery(e.to_string()))?;
        Ok(())
    }
}

/// Get local IP addresses (non-loopback)
pub fn get_local_ips() -> Vec<IpAddr> {
    let mut ips = Vec::new();

    if let Ok(interfaces) = get_if_addrs::get_if_addrs() {
        for iface in interfaces {
            if !iface.is_loopback() {
                ips.push(iface.ip());
            }
        }
    }

    ips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_local_ips() {
        let ips = get_local_ips();
        // Should have at least one IP in most environments
        println!("Local IPs: {:?}", ips);
    }
}
