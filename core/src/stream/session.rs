//! One stream-channel session over a reliable byte stream
//!
//! A session runs a continuous read loop and, when configured, a keepalive
//! loop. Both communicate with the owner through an event channel; the
//! write path is shared behind a single lock so the keepalive loop and data
//! senders never interleave partial frames.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

use crate::protocol::constants::{KEEPALIVE_INTERVAL, MAX_PAYLOAD, PONG_TIMEOUT};
use crate::stream::framing::{read_frame, write_frame, Frame};
use crate::{Error, Result};

/// Session lifecycle; the terminal states are reached exactly once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
    Error,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionState::Connected)
    }
}

/// Event emitted by a running session
#[derive(Debug)]
pub enum SessionEvent {
    /// A payload frame arrived
    Payload(Vec<u8>),
    /// The session reached its terminal state
    Closed(SessionState),
}

/// Per-session knobs
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Ping every 5 s and scuttle the session when the pong is late
    pub keepalive: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { keepalive: true }
    }
}

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type SharedWriter = Arc<Mutex<Box<dyn AsyncWrite + Send + Unpin>>>;

struct Shared {
    writer: SharedWriter,
    state_tx: watch::Sender<SessionState>,
    events_tx: mpsc::Sender<SessionEvent>,
    pending_pongs: StdMutex<VecDeque<oneshot::Sender<()>>>,
}

impl Shared {
    async fn write(&self, frame: &Frame) -> Result<()> {
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, frame).await
    }

    /// The first terminal state wins; later calls are no-ops
    fn terminate(&self, state: SessionState) {
        let entered = self.state_tx.send_if_modified(|current| {
            if current.is_terminal() {
                false
            } else {
                *current = state;
                true
            }
        });
        if entered {
            let _ = self.events_tx.try_send(SessionEvent::Closed(state));
        }
    }
}

/// Handle to a spawned session
pub struct StreamSession {
    shared: Arc<Shared>,
    state_rx: watch::Receiver<SessionState>,
    read_task: JoinHandle<()>,
    keepalive_task: Option<JoinHandle<()>>,
}

impl StreamSession {
    /// Split the stream and start the loops. Payloads and the terminal
    /// notification arrive on the returned receiver.
    pub fn spawn<S>(stream: S, config: SessionConfig) -> (Self, mpsc::Receiver<SessionEvent>)
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let reader = Box::new(read_half) as BoxedReader;
        let writer: SharedWriter =
            Arc::new(Mutex::new(Box::new(write_half) as Box<dyn AsyncWrite + Send + Unpin>));

        let (state_tx, state_rx) = watch::channel(SessionState::Connected);
        let (events_tx, events_rx) = mpsc::channel(64);

        let shared = Arc::new(Shared {
            writer,
            state_tx,
            events_tx,
            pending_pongs: StdMutex::new(VecDeque::new()),
        });

        let read_task = tokio::spawn(read_loop(reader, shared.clone(), state_rx.clone()));
        let keepalive_task = config
            .keepalive
            .then(|| tokio::spawn(keepalive_loop(shared.clone(), state_rx.clone())));

        (
            Self {
                shared,
                state_rx,
                read_task,
                keepalive_task,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn states(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Send one payload frame
    pub async fn send(&self, payload: Vec<u8>) -> Result<()> {
        if self.state().is_terminal() {
            return Err(Error::NotReady("session is closed".to_string()));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::Protocol(format!(
                "payload of {} bytes exceeds {}",
                payload.len(),
                MAX_PAYLOAD
            )));
        }
        self.shared.write(&Frame::Payload(payload)).await
    }

    /// Terminate into `Error`; the path for protocol violations detected
    /// above the framing layer. Idempotent like any terminal transition.
    pub fn scuttle(&self) {
        self.shared.terminate(SessionState::Error);
    }

    /// Orderly local close; idempotent
    pub fn close(&self) {
        self.shared.terminate(SessionState::Disconnected);
    }

    /// Close and stop both loops without waiting for them
    pub fn abort(self) {
        self.shared.terminate(SessionState::Disconnected);
        self.read_task.abort();
        if let Some(task) = self.keepalive_task {
            task.abort();
        }
    }
}

async fn read_loop(
    mut reader: BoxedReader,
    shared: Arc<Shared>,
    mut state_rx: watch::Receiver<SessionState>,
) {
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() || state_rx.borrow().is_terminal() {
                    break;
                }
            }
            frame = read_frame(&mut reader) => match frame {
                Ok(Some(Frame::Ping)) => {
                    if shared.write(&Frame::Pong).await.is_err() {
                        shared.terminate(SessionState::Error);
                        break;
                    }
                }
                Ok(Some(Frame::Pong)) => {
                    let waiter = shared
                        .pending_pongs
                        .lock()
                        .ok()
                        .and_then(|mut queue| queue.pop_front());
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(());
                        }
                        None => tracing::debug!("unsolicited pong"),
                    }
                }
                Ok(Some(Frame::Payload(payload))) => {
                    if shared.events_tx.send(SessionEvent::Payload(payload)).await.is_err() {
                        shared.terminate(SessionState::Disconnected);
                        break;
                    }
                }
                Ok(None) => {
                    shared.terminate(SessionState::Disconnected);
                    break;
                }
                Err(e) => {
                    tracing::warn!("stream session read failed: {}", e);
                    shared.terminate(SessionState::Error);
                    break;
                }
            }
        }
    }
}

async fn keepalive_loop(shared: Arc<Shared>, mut state_rx: watch::Receiver<SessionState>) {
    let mut ticker = interval(KEEPALIVE_INTERVAL);
    loop {
        tokio::select! {
            changed = state_rx.changed() => {
                if changed.is_err() || state_rx.borrow().is_terminal() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let (tx, rx) = oneshot::channel();
                if let Ok(mut queue) = shared.pending_pongs.lock() {
                    queue.push_back(tx);
                }
                if shared.write(&Frame::Ping).await.is_err() {
                    shared.terminate(SessionState::Error);
                    break;
                }
                match timeout(PONG_TIMEOUT, rx).await {
                    Ok(Ok(())) => {}
                    _ => {
                        tracing::warn!("keepalive pong overdue, scuttling session");
                        shared.terminate(SessionState::Error);
                        break;
                    }
                }
            }
        }
    }
}
