//! Radio seam for the control channel
//!
//! The connection state machine in [`super::ControlTransport`] is written
//! against these traits; the concrete channel (TCP in this tree, or any
//! short-range radio equivalent) is injected at construction time.

use async_trait::async_trait;

use crate::Result;

/// The radio half: reports power state and establishes links
#[async_trait]
pub trait ControlChannel: Send + Sync {
    /// Whether the underlying radio is usable at all. A connect attempt
    /// while powered off is a no-op.
    fn is_powered_on(&self) -> bool;

    /// Establish the physical link to a peer address
    async fn open(&self, address: &str) -> Result<Box<dyn ControlLink>>;
}

/// An established link, before and after endpoint confirmation
#[async_trait]
pub trait ControlLink: Send {
    /// Largest unit the channel will carry in one write
    fn mtu(&self) -> usize;

    /// Verify the logical endpoint is present on the peer; the transport
    /// only reaches Ready once this succeeds
    async fn confirm_endpoint(&mut self) -> Result<()>;

    /// Split into independently owned read/write halves
    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>);
}

#[async_trait]
pub trait LinkReader: Send {
    /// Next framed unit from the peer; `Ok(None)` on orderly close
    async fn next_unit(&mut self) -> Result<Option<Vec<u8>>>;
}

#[async_trait]
pub trait LinkWriter: Send {
    /// Write one unit as a single opaque frame
    async fn write_unit(&mut self, unit: &[u8]) -> Result<()>;

    /// Tear the link down
    async fn close(&mut self);
}
