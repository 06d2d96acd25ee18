//! Orchestrator unifying both transports, encryption, and history
//!
//! The broker owns the transport lifecycles, applies encryption and
//! decryption, keeps history current, and publishes one composite state
//! stream plus one item stream. External consumers read only those two
//! streams and never touch transport internals.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::assembly::BlobAssembly;
use crate::clipboard::ClipboardManager;
use crate::control::{ControlChannel, ControlState, ControlTransport};
use crate::crypto::KeyChain;
use crate::history::{History, HistoryEntry};
use crate::platform::{
    ClipboardSink, FileProvider, FsFileProvider, LogNotifier, NoopWakeLock, NotificationSink,
    WakeLock,
};
use crate::protocol::{
    BlobInfo, Message, MessageKind, PayloadKind, Transfer, TransferData,
};
use crate::stream::{
    dial, send_blob, ServerEvent, SessionConfig, SessionEvent, SessionState, StreamPayload,
    StreamServer, StreamServerHandle,
};
use crate::{Config, DeviceIdentity, Error, Result};

/// Composite connection state published to consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerState {
    pub control: ControlState,
    /// State of the most recent stream session, once one has been active
    pub stream: Option<SessionState>,
    pub key_ready: bool,
}

/// Coarse connection phase derived from the control sub-machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    Idle,
    Connecting,
    Connected,
    Ready,
    PoweredOff,
    Error,
}

impl BrokerState {
    pub fn phase(&self) -> ConnectionPhase {
        match self.control {
            ControlState::Idle | ControlState::Disconnected => ConnectionPhase::Idle,
            ControlState::Connecting => ConnectionPhase::Connecting,
            ControlState::Connected => ConnectionPhase::Connected,
            ControlState::Ready => ConnectionPhase::Ready,
            ControlState::PoweredOff => ConnectionPhase::PoweredOff,
            ControlState::Error => ConnectionPhase::Error,
        }
    }
}

/// Host collaborators injected into the broker
pub struct Collaborators {
    pub clipboard: Arc<dyn ClipboardSink>,
    pub files: Arc<dyn FileProvider>,
    pub notifier: Arc<dyn NotificationSink>,
    pub wake: Arc<dyn WakeLock>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            clipboard: Arc::new(ClipboardManager::new()),
            files: Arc::new(FsFileProvider),
            notifier: Arc::new(LogNotifier),
            wake: Arc::new(NoopWakeLock),
        }
    }
}

#[derive(Default)]
struct PeerPresence {
    address: Option<String>,
    name: Option<String>,
    stream_addr: Option<SocketAddr>,
}

/// Everything the background pumps share with the broker handle
struct Shared {
    keys: Arc<KeyChain>,
    history: Arc<History>,
    assembly: Arc<BlobAssembly>,
    clipboard: Arc<dyn ClipboardSink>,
    notifier: Arc<dyn NotificationSink>,
    items_tx: mpsc::Sender<Transfer>,
    state_tx: watch::Sender<BrokerState>,
    peer: Arc<StdMutex<PeerPresence>>,
    /// In-flight blob transfers keyed by blob id
    transfers: Mutex<HashMap<String, Transfer>>,
}

impl Shared {
    async fn publish(&self, transfer: Transfer) {
        let _ = self.items_tx.send(transfer).await;
    }

    async fn register_transfer(&self, transfer: Transfer) {
        self.transfers
            .lock()
            .await
            .insert(transfer.id.clone(), transfer);
    }

    async fn take_transfer(&self, id: &str) -> Option<Transfer> {
        self.transfers.lock().await.remove(id)
    }

    async fn advance_transfer(&self, id: &str, received: u64) -> Option<Transfer> {
        let mut transfers = self.transfers.lock().await;
        let transfer = transfers.get_mut(id)?;
        transfer.advance_to(received);
        Some(transfer.clone())
    }
}

/// The single object external consumers talk to
pub struct Broker {
    identity: DeviceIdentity,
    config: Config,
    keys: Arc<KeyChain>,
    control: Arc<ControlTransport>,
    inbound_rx: Option<mpsc::Receiver<Vec<u8>>>,
    collab: Collaborators,
    state_tx: watch::Sender<BrokerState>,
    items_tx: mpsc::Sender<Transfer>,
    items_rx: Option<mpsc::Receiver<Transfer>>,
    peer: Arc<StdMutex<PeerPresence>>,
    shared: Option<Arc<Shared>>,
    server_handle: Option<StreamServerHandle>,
    stream_port: Option<u16>,
    tasks: Vec<JoinHandle<()>>,
}

impl Broker {
    /// Construct a broker for one identity. The identity is fixed for the
    /// broker's lifetime; running with a different identity means
    /// constructing a different broker.
    pub fn new(
        identity: DeviceIdentity,
        config: Config,
        keys: Arc<KeyChain>,
        channel: Arc<dyn ControlChannel>,
        collab: Collaborators,
    ) -> Self {
        let (control, inbound_rx) = ControlTransport::new(channel);
        let (state_tx, _) = watch::channel(BrokerState {
            control: ControlState::Idle,
            stream: None,
            key_ready: keys.is_ready(),
        });
        let (items_tx, items_rx) = mpsc::channel(64);

        Self {
            identity,
            config,
            keys,
            control: Arc::new(control),
            inbound_rx: Some(inbound_rx),
            collab,
            state_tx,
            items_tx,
            items_rx: Some(items_rx),
            peer: Arc::new(StdMutex::new(PeerPresence::default())),
            shared: None,
            server_handle: None,
            stream_port: None,
            tasks: Vec::new(),
        }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// (Re)derive the master key; updates the published key readiness
    pub fn setup_key(&self, passphrase: &str, salt: &[u8]) {
        self.keys.setup(passphrase, salt);
        let ready = self.keys.is_ready();
        self.state_tx.send_modify(|s| s.key_ready = ready);
    }

    /// Watch the composite state
    pub fn states(&self) -> watch::Receiver<BrokerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> BrokerState {
        *self.state_tx.borrow()
    }

    /// Port the eager stream server bound to; available after `start`
    pub fn stream_port(&self) -> Option<u16> {
        self.stream_port
    }

    /// Peer device name learned over the control channel
    pub fn peer_name(&self) -> Option<String> {
        self.peer.lock().expect("peer lock").name.clone()
    }

    /// Known stream endpoint of the peer (from discovery)
    pub fn set_peer_stream_addr(&self, addr: SocketAddr) {
        self.peer.lock().expect("peer lock").stream_addr = Some(addr);
    }

    /// Bring up storage, history, the eager stream server, and the pump
    /// tasks. Items flow out of the returned receiver; calling twice is a
    /// configuration error.
    pub async fn start(&mut self) -> Result<mpsc::Receiver<Transfer>> {
        let items_rx = self
            .items_rx
            .take()
            .ok_or_else(|| Error::Config("broker already started".to_string()))?;
        let inbound_rx = self
            .inbound_rx
            .take()
            .ok_or_else(|| Error::Config("broker already started".to_string()))?;

        tokio::fs::create_dir_all(&self.config.data_dir).await?;
        let assembly = Arc::new(
            BlobAssembly::new(&self.config.data_dir, self.config.mirror_dir.clone()).await?,
        );
        let history = Arc::new(History::open(
            self.config.data_dir.join("history.json"),
            self.config.max_history,
        ));

        let shared = Arc::new(Shared {
            keys: self.keys.clone(),
            history,
            assembly,
            clipboard: self.collab.clipboard.clone(),
            notifier: self.collab.notifier.clone(),
            items_tx: self.items_tx.clone(),
            state_tx: self.state_tx.clone(),
            peer: self.peer.clone(),
            transfers: Mutex::new(HashMap::new()),
        });
        self.shared = Some(shared.clone());

        // The stream server is up eagerly; outbound transfers dial on demand
        let server = StreamServer::bind(self.config.stream_port).await?;
        self.stream_port = Some(server.port());
        let (server_rx, server_handle) = server.start(SessionConfig { keepalive: true });
        self.server_handle = Some(server_handle);

        // Fold control state changes into the composite state
        let mut control_states = self.control.states();
        let state_tx = self.state_tx.clone();
        self.tasks.push(tokio::spawn(async move {
            while control_states.changed().await.is_ok() {
                let control = *control_states.borrow();
                state_tx.send_modify(|s| s.control = control);
            }
        }));

        self.tasks
            .push(tokio::spawn(pump_control(inbound_rx, shared.clone())));
        self.tasks
            .push(tokio::spawn(pump_server(server_rx, shared)));

        tracing::info!(device = %self.identity.name, "broker started");
        Ok(items_rx)
    }

    /// Connect the control channel to a peer address
    pub async fn connect(&self, address: &str) -> Result<()> {
        self.peer.lock().expect("peer lock").address = Some(address.to_string());
        self.control.connect(address).await?;

        if self.control.state() == ControlState::Ready {
            // Introduce ourselves
            self.send_message(Message::new(
                MessageKind::DeviceName,
                self.identity.name.clone(),
            ));
        }
        Ok(())
    }

    /// Tear the control channel down
    pub fn disconnect(&self) {
        self.control.disconnect();
    }

    /// Send clipboard text to the peer.
    ///
    /// The item is appended to history and published immediately; the
    /// encrypted send happens in the background and its outcome does not
    /// change the published item (control-channel sends are
    /// fire-and-forget).
    pub async fn send_text(&self, content: &str) -> Result<Transfer> {
        let shared = self.shared()?;
        let transfer = Transfer::text(content, true);

        shared.history.add((&transfer).into()).await;
        shared.publish(transfer.clone()).await;

        self.send_message(Message::new(MessageKind::Clipboard, content.to_string()));
        Ok(transfer)
    }

    /// Send a file: metadata announcement over the control channel, data
    /// over an on-demand stream connection. Progress appears on the item
    /// stream; the returned transfer is terminal.
    pub async fn send_file(&self, path: &Path) -> Result<Transfer> {
        let shared = self.shared()?;

        let (mut reader, size) = self.collab.files.open(path).await?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("blob")
            .to_string();
        let info = BlobInfo {
            id: Uuid::new_v4().to_string(),
            name: name.clone(),
            kind: PayloadKind::for_name(&name),
            total_size: size,
        };

        let mut transfer = Transfer::blob(&info, true);
        shared.publish(transfer.clone()).await;

        self.send_message(Message::new(MessageKind::FileAnnounce, info.to_value()?));

        let dialed = match self.peer_stream_addr() {
            Ok(addr) => dial(addr, SessionConfig { keepalive: false }).await,
            Err(e) => Err(e),
        };
        let (session, _session_events) = match dialed {
            Ok(pair) => pair,
            Err(e) => {
                transfer.fail(e.to_string());
                shared.history.add((&transfer).into()).await;
                shared.publish(transfer).await;
                return Err(e);
            }
        };
        self.state_tx
            .send_modify(|s| s.stream = Some(SessionState::Connected));

        let _wake = self.collab.wake.acquire("blob transfer");
        transfer.activate();
        shared.publish(transfer.clone()).await;

        let items_tx = self.items_tx.clone();
        let mut progress_view = transfer.clone();
        let result = send_blob(&session, &info, &mut reader, |sent| {
            progress_view.advance_to(sent);
            let _ = items_tx.try_send(progress_view.clone());
        })
        .await;

        session.close();
        self.state_tx
            .send_modify(|s| s.stream = Some(SessionState::Disconnected));

        match result {
            Ok(()) => {
                transfer.advance_to(size);
                transfer.complete(Some(TransferData::Stored(path.to_path_buf())));
            }
            Err(ref e) => transfer.fail(e.to_string()),
        }
        shared.history.add((&transfer).into()).await;
        shared.notifier.transfer_finished(&transfer);
        shared.publish(transfer.clone()).await;

        result.map(|_| transfer)
    }

    /// Persisted history, oldest first
    pub async fn history(&self) -> Result<Vec<HistoryEntry>> {
        Ok(self.shared()?.history.retrieve().await)
    }

    pub async fn clear_history(&self) -> Result<()> {
        self.shared()?.history.clear().await;
        Ok(())
    }

    /// Deterministic teardown of transports and pump tasks
    pub async fn shutdown(&mut self) {
        self.control.disconnect();
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.state_tx.send_modify(|s| {
            s.control = ControlState::Disconnected;
            s.stream = None;
        });
    }

    fn shared(&self) -> Result<&Arc<Shared>> {
        self.shared
            .as_ref()
            .ok_or_else(|| Error::NotReady("broker is not started".to_string()))
    }

    /// Seal and send in the background; failures are logged, not surfaced
    fn send_message(&self, message: Message) {
        let keys = self.keys.clone();
        let control = self.control.clone();
        tokio::spawn(async move {
            match keys.seal_message(&message) {
                Ok(unit) => {
                    if let Err(e) = control.send(unit).await {
                        tracing::debug!("control send failed: {}", e);
                    }
                }
                Err(e) => tracing::debug!("message seal failed: {}", e),
            }
        });
    }

    fn peer_stream_addr(&self) -> Result<SocketAddr> {
        let peer = self.peer.lock().expect("peer lock");
        if let Some(addr) = peer.stream_addr {
            return Ok(addr);
        }
        let control = peer
            .address
            .clone()
            .ok_or_else(|| Error::NotReady("no peer address known".to_string()))?;
        let control: SocketAddr = control.parse().map_err(|_| {
            Error::Network(format!("peer address {} is not a socket address", control))
        })?;
        Ok(SocketAddr::new(control.ip(), self.config.peer_stream_port))
    }
}

/// Decrypt inbound control units and act on them
async fn pump_control(mut inbound_rx: mpsc::Receiver<Vec<u8>>, shared: Arc<Shared>) {
    while let Some(unit) = inbound_rx.recv().await {
        let peer_address = shared.peer.lock().expect("peer lock").address.clone();
        let Some(message) = shared.keys.open_message(&unit, peer_address.as_deref()) else {
            tracing::debug!("dropping undecryptable control unit");
            continue;
        };

        match message.kind {
            MessageKind::Clipboard => {
                if let Err(e) = shared.clipboard.write_text(&message.value) {
                    tracing::warn!("clipboard write failed: {}", e);
                }
                let transfer = Transfer::text(&message.value, false);
                shared.history.add((&transfer).into()).await;
                shared.publish(transfer).await;
            }
            MessageKind::DeviceName => {
                tracing::info!(peer = %message.value, "peer device name");
                shared.peer.lock().expect("peer lock").name = Some(message.value);
            }
            MessageKind::FileAnnounce => match BlobInfo::from_value(&message.value) {
                Ok(info) => {
                    let transfer = Transfer::blob(&info, false);
                    shared.notifier.transfer_offered(&transfer);
                    shared.register_transfer(transfer.clone()).await;
                    shared.publish(transfer).await;
                }
                Err(e) => tracing::debug!("dropping malformed file announcement: {}", e),
            },
        }
    }
}

/// Hand each accepted stream session its own pump
async fn pump_server(mut server_rx: mpsc::Receiver<ServerEvent>, shared: Arc<Shared>) {
    while let Some(event) = server_rx.recv().await {
        let ServerEvent::SessionOpened {
            peer,
            session,
            events,
        } = event;
        tracing::debug!("stream session from {}", peer);
        shared
            .state_tx
            .send_modify(|s| s.stream = Some(SessionState::Connected));
        tokio::spawn(pump_session(session, events, shared.clone()));
    }
}

/// Route one session's payloads through blob assembly
async fn pump_session(
    session: crate::stream::StreamSession,
    mut events: mpsc::Receiver<SessionEvent>,
    shared: Arc<Shared>,
) {
    let mut active_blob: Option<String> = None;

    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::Payload(bytes) => match StreamPayload::decode(&bytes) {
                Ok(StreamPayload::Announce {
                    id,
                    name,
                    kind,
                    total_size,
                }) => {
                    let info = BlobInfo {
                        id: id.clone(),
                        name,
                        kind,
                        total_size,
                    };
                    match shared.assembly.open(info.clone()).await {
                        Ok(()) => {
                            active_blob = Some(id.clone());
                            // The control channel may have announced this blob
                            // already; keep that record if so
                            let mut transfer = shared
                                .take_transfer(&id)
                                .await
                                .unwrap_or_else(|| Transfer::blob(&info, false));
                            transfer.activate();
                            shared.register_transfer(transfer.clone()).await;
                            shared.publish(transfer).await;
                        }
                        Err(e) => tracing::warn!("cannot open assembly session: {}", e),
                    }
                }
                Ok(StreamPayload::Chunk { id, offset, data }) => {
                    match shared.assembly.write(&id, offset, &data).await {
                        Ok(received) => {
                            if shared.assembly.is_complete(&id).await {
                                finish_blob(&shared, &id, received).await;
                                active_blob = None;
                            } else if let Some(transfer) =
                                shared.advance_transfer(&id, received).await
                            {
                                shared.publish(transfer).await;
                            }
                        }
                        Err(e) => {
                            tracing::warn!("chunk write failed: {}", e);
                            shared.assembly.cancel(&id).await;
                            if let Some(mut transfer) = shared.take_transfer(&id).await {
                                transfer.fail(e.to_string());
                                shared.notifier.transfer_finished(&transfer);
                                shared.publish(transfer).await;
                            }
                            if active_blob.as_deref() == Some(id.as_str()) {
                                active_blob = None;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!("undecodable stream payload: {}", e);
                    session.scuttle();
                }
            },
            SessionEvent::Closed(state) => {
                shared.state_tx.send_modify(|s| s.stream = Some(state));
                if let Some(id) = active_blob.take() {
                    shared.assembly.cancel(&id).await;
                    if let Some(mut transfer) = shared.take_transfer(&id).await {
                        transfer.fail("stream session closed mid-transfer");
                        shared.notifier.transfer_finished(&transfer);
                        shared.publish(transfer).await;
                    }
                }
                break;
            }
        }
    }
}

async fn finish_blob(shared: &Arc<Shared>, id: &str, received: u64) {
    match shared.assembly.finalize(id).await {
        Ok(path) => {
            if let Some(mut transfer) = shared.take_transfer(id).await {
                transfer.advance_to(received);
                transfer.complete(Some(TransferData::Stored(path)));
                shared.history.add((&transfer).into()).await;
                shared.notifier.transfer_finished(&transfer);
                shared.publish(transfer).await;
            }
        }
        Err(e) => {
            tracing::error!("blob finalization failed: {}", e);
            if let Some(mut transfer) = shared.take_transfer(id).await {
                transfer.fail(e.to_string());
                shared.notifier.transfer_finished(&transfer);
                shared.publish(transfer).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::mock::MockChannel;
    use crate::protocol::TransferStatus;
    use std::time::Duration;
    use tokio::sync::mpsc::UnboundedSender;

    struct MemClipboard(StdMutex<Vec<String>>);

    impl ClipboardSink for MemClipboard {
        fn write_text(&self, text: &str) -> Result<()> {
            self.0.lock().expect("sink lock").push(text.to_string());
            Ok(())
        }
    }

    struct TestBroker {
        broker: Broker,
        items: mpsc::Receiver<Transfer>,
        clipboard: Arc<MemClipboard>,
        peer_tx: UnboundedSender<Vec<u8>>,
        _peer_rx: mpsc::UnboundedReceiver<Vec<u8>>,
        _dir: tempfile::TempDir,
    }

    async fn start_broker(peer_keys: &KeyChain) -> TestBroker {
        let dir = tempfile::tempdir().unwrap();
        let keys = Arc::new(KeyChain::new());
        keys.setup("shared secret", b"salt");
        peer_keys.setup("shared secret", b"salt");

        let (channel, peer_rx, peer_tx) = MockChannel::with_link(512);
        let clipboard = Arc::new(MemClipboard(StdMutex::new(Vec::new())));

        let config = Config {
            stream_port: 0,
            data_dir: dir.path().to_path_buf(),
            mirror_dir: None,
            ..Config::default()
        };

        let mut broker = Broker::new(
            DeviceIdentity::new("desk".to_string()),
            config,
            keys,
            channel,
            Collaborators {
                clipboard: clipboard.clone(),
                files: Arc::new(FsFileProvider),
                notifier: Arc::new(LogNotifier),
                wake: Arc::new(NoopWakeLock),
            },
        );
        let items = broker.start().await.unwrap();

        TestBroker {
            broker,
            items,
            clipboard,
            peer_tx,
            _peer_rx: peer_rx,
            _dir: dir,
        }
    }

    async fn next_item(items: &mut mpsc::Receiver<Transfer>) -> Transfer {
        tokio::time::timeout(Duration::from_secs(5), items.recv())
            .await
            .expect("timed out waiting for item")
            .expect("item stream closed")
    }

    #[tokio::test]
    async fn test_send_text_publishes_regardless_of_transport() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;

        // Control channel never connected; the item still goes out
        let sent = t.broker.send_text("hello").await.unwrap();
        assert_eq!(sent.status, TransferStatus::Completed);
        assert!(sent.outgoing);

        let published = next_item(&mut t.items).await;
        assert_eq!(published.id, sent.id);

        let entries = t.broker.history().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].data,
            Some(TransferData::Text("hello".to_string()))
        );
    }

    #[tokio::test]
    async fn test_inbound_clipboard_reaches_sink_history_and_stream() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;

        t.broker.connect("peer").await.unwrap();
        let mut states = t.broker.states();
        states
            .wait_for(|s| s.phase() == ConnectionPhase::Ready)
            .await
            .unwrap();

        let unit = peer_keys
            .seal_message(&Message::new(
                MessageKind::Clipboard,
                "from phone".to_string(),
            ))
            .unwrap();
        t.peer_tx.send(unit).unwrap();

        let item = next_item(&mut t.items).await;
        assert!(!item.outgoing);
        assert_eq!(item.kind, PayloadKind::Text);
        assert_eq!(item.data, Some(TransferData::Text("from phone".to_string())));

        assert_eq!(
            t.clipboard.0.lock().unwrap().as_slice(),
            ["from phone".to_string()]
        );
        assert_eq!(t.broker.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_inbound_is_dropped() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;
        t.broker.connect("peer").await.unwrap();

        let mut message = Message::new(MessageKind::Clipboard, "old news".to_string());
        message.timestamp_ms = crate::protocol::now_ms() - 61_000;
        t.peer_tx
            .send(peer_keys.seal_message(&message).unwrap())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(t.items.try_recv().is_err());
        assert!(t.clipboard.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_device_name_recorded() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;
        t.broker.connect("peer").await.unwrap();

        t.peer_tx
            .send(
                peer_keys
                    .seal_message(&Message::new(MessageKind::DeviceName, "phone".to_string()))
                    .unwrap(),
            )
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(t.broker.peer_name().as_deref(), Some("phone"));
        assert!(t.items.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_disconnect_maps_to_idle_phase() {
        let peer_keys = KeyChain::new();
        let t = start_broker(&peer_keys).await;

        t.broker.connect("peer").await.unwrap();
        let mut states = t.broker.states();
        states
            .wait_for(|s| s.phase() == ConnectionPhase::Ready)
            .await
            .unwrap();

        t.broker.disconnect();
        states
            .wait_for(|s| s.control == ControlState::Disconnected)
            .await
            .unwrap();
        assert_eq!(t.broker.state().phase(), ConnectionPhase::Idle);
    }

    #[tokio::test]
    async fn test_incoming_blob_assembles_to_completed_item() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;
        let port = t.broker.stream_port().unwrap();

        // The peer dials our eager stream server and sends a blob
        let addr: SocketAddr = ([127, 0, 0, 1], port).into();
        let (session, _events) = crate::stream::dial(addr, SessionConfig { keepalive: false })
            .await
            .unwrap();

        let info = BlobInfo {
            id: "b1".to_string(),
            name: "x.txt".to_string(),
            kind: PayloadKind::File,
            total_size: 10,
        };
        session
            .send(StreamPayload::announce(&info).encode().unwrap())
            .await
            .unwrap();
        for (offset, data) in [(0u64, b"hello"), (5u64, b"world")] {
            session
                .send(
                    StreamPayload::Chunk {
                        id: "b1".to_string(),
                        offset,
                        data: data.to_vec(),
                    }
                    .encode()
                    .unwrap(),
                )
                .await
                .unwrap();
        }

        let completed = loop {
            let item = next_item(&mut t.items).await;
            if item.status == TransferStatus::Completed {
                break item;
            }
        };
        assert!(!completed.outgoing);
        assert_eq!(completed.progress(), 100);

        let Some(TransferData::Stored(path)) = completed.data else {
            panic!("expected a stored artifact");
        };
        assert_eq!(tokio::fs::read(&path).await.unwrap(), b"helloworld");
        assert_eq!(t.broker.history().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_file_streams_announce_and_chunks() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;

        // Stand-in for the peer's stream server
        let peer_server = StreamServer::bind(0).await.unwrap();
        let peer_port = peer_server.port();
        let (mut peer_events, _handle) = peer_server.start(SessionConfig { keepalive: false });
        t.broker
            .set_peer_stream_addr(([127, 0, 0, 1], peer_port).into());

        let file = t._dir.path().join("payload.bin");
        tokio::fs::write(&file, b"0123456789").await.unwrap();

        let finished = t.broker.send_file(&file).await.unwrap();
        assert_eq!(finished.status, TransferStatus::Completed);
        assert_eq!(finished.total_size, 10);

        let ServerEvent::SessionOpened { mut events, .. } =
            peer_events.recv().await.expect("peer saw no session");

        let mut payloads = Vec::new();
        while payloads.len() < 2 {
            match events.recv().await {
                Some(SessionEvent::Payload(bytes)) => {
                    payloads.push(StreamPayload::decode(&bytes).unwrap())
                }
                Some(SessionEvent::Closed(_)) => break,
                None => break,
            }
        }

        assert!(matches!(
            &payloads[0],
            StreamPayload::Announce { total_size: 10, .. }
        ));
        assert!(matches!(
            &payloads[1],
            StreamPayload::Chunk { offset: 0, data, .. } if data == b"0123456789"
        ));

        // Pending, Active, then Completed on the item stream
        let first = next_item(&mut t.items).await;
        assert_eq!(first.status, TransferStatus::Pending);
        let completed = loop {
            let item = next_item(&mut t.items).await;
            if item.status.is_terminal() {
                break item;
            }
        };
        assert_eq!(completed.status, TransferStatus::Completed);
    }

    #[tokio::test]
    async fn test_start_twice_is_config_error() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;
        assert!(matches!(t.broker.start().await, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_send_file_without_peer_fails_item() {
        let peer_keys = KeyChain::new();
        let mut t = start_broker(&peer_keys).await;

        let file = t._dir.path().join("payload.bin");
        tokio::fs::write(&file, b"data").await.unwrap();

        assert!(t.broker.send_file(&file).await.is_err());

        let first = next_item(&mut t.items).await;
        assert_eq!(first.status, TransferStatus::Pending);

        let failed = next_item(&mut t.items).await;
        assert_eq!(failed.status, TransferStatus::Error);
        assert!(failed.error.is_some());
    }
}
