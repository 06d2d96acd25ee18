//! In-memory control channel doubles for tests

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::control::channel::{ControlChannel, ControlLink, LinkReader, LinkWriter};
use crate::{Error, Result};

pub(crate) struct MockLink {
    pub mtu: usize,
    pub to_peer: mpsc::UnboundedSender<Vec<u8>>,
    pub from_peer: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl ControlLink for MockLink {
    fn mtu(&self) -> usize {
        self.mtu
    }

    async fn confirm_endpoint(&mut self) -> Result<()> {
        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        (
            Box::new(MockReader {
                from_peer: self.from_peer,
            }),
            Box::new(MockWriter {
                to_peer: self.to_peer,
            }),
        )
    }
}

struct MockReader {
    from_peer: mpsc::UnboundedReceiver<Vec<u8>>,
}

#[async_trait]
impl LinkReader for MockReader {
    async fn next_unit(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.from_peer.recv().await)
    }
}

struct MockWriter {
    to_peer: mpsc::UnboundedSender<Vec<u8>>,
}

#[async_trait]
impl LinkWriter for MockWriter {
    async fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        self.to_peer
            .send(unit.to_vec())
            .map_err(|_| Error::Network("peer gone".to_string()))
    }

    async fn close(&mut self) {}
}

/// One-link channel double. The returned receiver sees everything the
/// transport writes; the returned sender injects inbound units.
pub(crate) struct MockChannel {
    pub powered: bool,
    pub fail: bool,
    pub opens: AtomicU32,
    pub link: StdMutex<Option<MockLink>>,
}

impl MockChannel {
    pub fn with_link(
        mtu: usize,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedReceiver<Vec<u8>>,
        mpsc::UnboundedSender<Vec<u8>>,
    ) {
        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (from_peer_tx, from_peer_rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Self {
            powered: true,
            fail: false,
            opens: AtomicU32::new(0),
            link: StdMutex::new(Some(MockLink {
                mtu,
                to_peer: to_peer_tx,
                from_peer: from_peer_rx,
            })),
        });
        (channel, to_peer_rx, from_peer_tx)
    }

    pub fn unusable(powered: bool) -> Arc<Self> {
        Arc::new(Self {
            powered,
            fail: true,
            opens: AtomicU32::new(0),
            link: StdMutex::new(None),
        })
    }
}

#[async_trait]
impl ControlChannel for MockChannel {
    fn is_powered_on(&self) -> bool {
        self.powered
    }

    async fn open(&self, _address: &str) -> Result<Box<dyn ControlLink>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Network("link failed".to_string()));
        }
        match self.link.lock().expect("link lock").take() {
            Some(link) => Ok(Box::new(link)),
            None => Err(Error::Network("link already taken".to_string())),
        }
    }
}
