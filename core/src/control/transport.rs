//! Control-channel connection state machine
//!
//! Drives an injected [`ControlChannel`] through
//! `Idle → Connecting → Connected → Ready`, with `Disconnected`,
//! `PoweredOff` and `Error` reachable from anywhere. Once ready, a writer
//! task drains the send queue (one outstanding write at a time) and a
//! reader task forwards inbound units on an event channel.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::control::channel::{ControlChannel, ControlLink, LinkReader, LinkWriter};
use crate::protocol::constants::{CONNECT_ATTEMPTS, CONNECT_RETRY_DELAY, CONNECT_TIMEOUT};
use crate::{Error, Result};

/// Connection lifecycle of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlState {
    Idle,
    Connecting,
    Connected,
    Ready,
    Disconnected,
    PoweredOff,
    Error,
}

struct ActiveLink {
    out_tx: mpsc::Sender<Vec<u8>>,
    mtu: usize,
}

/// Stateful connection to the peer over the control channel
pub struct ControlTransport {
    channel: Arc<dyn ControlChannel>,
    state_tx: watch::Sender<ControlState>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    active: StdMutex<Option<ActiveLink>>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl ControlTransport {
    /// Inbound units (still encrypted) arrive on the returned receiver
    pub fn new(channel: Arc<dyn ControlChannel>) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (state_tx, _) = watch::channel(ControlState::Idle);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);

        (
            Self {
                channel,
                state_tx,
                inbound_tx,
                active: StdMutex::new(None),
                tasks: StdMutex::new(Vec::new()),
            },
            inbound_rx,
        )
    }

    pub fn state(&self) -> ControlState {
        *self.state_tx.borrow()
    }

    pub fn states(&self) -> watch::Receiver<ControlState> {
        self.state_tx.subscribe()
    }

    /// Connect to a peer address.
    ///
    /// No-op while the radio is off (the state goes to `PoweredOff`
    /// instead) and while a connection already exists or is in progress.
    /// Otherwise: up to 3 attempts 100 ms apart under a 10 s deadline,
    /// `Connected` on link establishment, `Ready` once the logical
    /// endpoint is confirmed.
    pub async fn connect(&self, address: &str) -> Result<()> {
        if !self.channel.is_powered_on() {
            self.state_tx.send_replace(ControlState::PoweredOff);
            return Ok(());
        }

        let started = self.state_tx.send_if_modified(|state| match state {
            ControlState::Connecting | ControlState::Connected | ControlState::Ready => false,
            _ => {
                *state = ControlState::Connecting;
                true
            }
        });
        if !started {
            return Ok(());
        }

        let mut link = match timeout(CONNECT_TIMEOUT, self.open_with_retry(address)).await {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                tracing::warn!("control connect to {} failed: {}", address, e);
                self.state_tx.send_replace(ControlState::Error);
                return Err(e);
            }
            Err(_) => {
                self.state_tx.send_replace(ControlState::Error);
                return Err(Error::Network(format!("connect to {} timed out", address)));
            }
        };
        self.state_tx.send_replace(ControlState::Connected);

        if let Err(e) = link.confirm_endpoint().await {
            tracing::warn!("endpoint confirmation with {} failed: {}", address, e);
            self.state_tx.send_replace(ControlState::Error);
            return Err(e);
        }

        let mtu = link.mtu();
        let (reader, writer) = link.split();
        let (out_tx, out_rx) = mpsc::channel(32);

        *self.active.lock().expect("active lock") = Some(ActiveLink { out_tx, mtu });

        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.push(tokio::spawn(write_loop(
            writer,
            out_rx,
            self.state_tx.clone(),
        )));
        tasks.push(tokio::spawn(read_loop(
            reader,
            self.inbound_tx.clone(),
            self.state_tx.clone(),
        )));
        drop(tasks);

        self.state_tx.send_replace(ControlState::Ready);
        tracing::info!("control channel ready with {}", address);
        Ok(())
    }

    async fn open_with_retry(&self, address: &str) -> Result<Box<dyn ControlLink>> {
        let mut last_err = None;
        for attempt in 1..=CONNECT_ATTEMPTS {
            match self.channel.open(address).await {
                Ok(link) => return Ok(link),
                Err(e) => {
                    tracing::debug!(attempt, "control open failed: {}", e);
                    last_err = Some(e);
                }
            }
            if attempt < CONNECT_ATTEMPTS {
                sleep(CONNECT_RETRY_DELAY).await;
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Network("no connect attempts made".to_string())))
    }

    /// Queue one encrypted unit for sending. Only allowed in `Ready`;
    /// the unit must fit the channel MTU.
    pub async fn send(&self, unit: Vec<u8>) -> Result<()> {
        if self.state() != ControlState::Ready {
            return Err(Error::NotReady("control channel is not ready".to_string()));
        }

        let (out_tx, mtu) = {
            let active = self.active.lock().expect("active lock");
            match active.as_ref() {
                Some(link) => (link.out_tx.clone(), link.mtu),
                None => return Err(Error::NotReady("control channel is not ready".to_string())),
            }
        };

        if unit.len() > mtu {
            return Err(Error::Protocol(format!(
                "unit of {} bytes exceeds the {} byte channel limit",
                unit.len(),
                mtu
            )));
        }

        out_tx
            .send(unit)
            .await
            .map_err(|_| Error::Network("send queue closed".to_string()))
    }

    /// Tear the link down; always ends in `Disconnected`, idempotently
    pub fn disconnect(&self) {
        self.active.lock().expect("active lock").take();
        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }
        self.state_tx.send_replace(ControlState::Disconnected);
    }
}

/// Only a live connection reports transport failures; an explicit
/// disconnect has already moved the state on
fn transition_from_ready(state_tx: &watch::Sender<ControlState>, to: ControlState) {
    state_tx.send_if_modified(|state| {
        if *state == ControlState::Ready {
            *state = to;
            true
        } else {
            false
        }
    });
}

async fn write_loop(
    mut writer: Box<dyn LinkWriter>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    state_tx: watch::Sender<ControlState>,
) {
    while let Some(unit) = out_rx.recv().await {
        if let Err(e) = writer.write_unit(&unit).await {
            tracing::warn!("control write failed: {}", e);
            transition_from_ready(&state_tx, ControlState::Error);
            break;
        }
    }
    writer.close().await;
}

async fn read_loop(
    mut reader: Box<dyn LinkReader>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    state_tx: watch::Sender<ControlState>,
) {
    loop {
        match reader.next_unit().await {
            Ok(Some(unit)) => {
                if inbound_tx.send(unit).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                transition_from_ready(&state_tx, ControlState::Disconnected);
                break;
            }
            Err(e) => {
                tracing::warn!("control read failed: {}", e);
                transition_from_ready(&state_tx, ControlState::Error);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockChannel;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn test_radio_off_goes_powered_off_without_attempts() {
        let channel = MockChannel::unusable(false);
        let (transport, _inbound) = ControlTransport::new(channel.clone());

        transport.connect("peer").await.unwrap();
        assert_eq!(transport.state(), ControlState::PoweredOff);
        assert_eq!(channel.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_exhausted_retries_end_in_error() {
        let channel = MockChannel::unusable(true);
        let (transport, _inbound) = ControlTransport::new(channel.clone());

        assert!(transport.connect("peer").await.is_err());
        assert_eq!(transport.state(), ControlState::Error);
        assert_eq!(channel.opens.load(Ordering::SeqCst), CONNECT_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_connect_send_receive() {
        let (channel, mut peer_rx, peer_tx) = MockChannel::with_link(16);
        let (transport, mut inbound) = ControlTransport::new(channel);

        transport.connect("peer").await.unwrap();
        assert_eq!(transport.state(), ControlState::Ready);

        transport.send(b"hi".to_vec()).await.unwrap();
        assert_eq!(peer_rx.recv().await.unwrap(), b"hi");

        peer_tx.send(b"from peer".to_vec()).unwrap();
        assert_eq!(inbound.recv().await.unwrap(), b"from peer");
    }

    #[tokio::test]
    async fn test_send_respects_mtu() {
        let (channel, _peer_rx, _peer_tx) = MockChannel::with_link(16);
        let (transport, _inbound) = ControlTransport::new(channel);

        transport.connect("peer").await.unwrap();
        assert!(matches!(
            transport.send(vec![0u8; 17]).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_send_requires_ready() {
        let (channel, _peer_rx, _peer_tx) = MockChannel::with_link(16);
        let (transport, _inbound) = ControlTransport::new(channel);

        assert!(matches!(
            transport.send(b"hi".to_vec()).await,
            Err(Error::NotReady(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (channel, _peer_rx, _peer_tx) = MockChannel::with_link(16);
        let (transport, _inbound) = ControlTransport::new(channel);

        transport.connect("peer").await.unwrap();
        transport.disconnect();
        assert_eq!(transport.state(), ControlState::Disconnected);

        transport.disconnect();
        assert_eq!(transport.state(), ControlState::Disconnected);
        assert!(transport.send(b"hi".to_vec()).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_close_disconnects() {
        let (channel, _peer_rx, peer_tx) = MockChannel::with_link(16);
        let (transport, _inbound) = ControlTransport::new(channel);

        transport.connect("peer").await.unwrap();

        drop(peer_tx);
        let mut states = transport.states();
        states
            .wait_for(|s| *s == ControlState::Disconnected)
            .await
            .unwrap();
    }
}
