//! TCP-backed control channel
//!
//! Units travel as 4-byte big-endian length-prefixed frames. Endpoint
//! confirmation exchanges the key-derived channel identifier as a banner:
//! a peer that cannot produce the same identifier does not hold the same
//! passphrase and is not our endpoint.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::control::channel::{ControlChannel, ControlLink, LinkReader, LinkWriter};
use crate::protocol::constants::{CONTROL_MTU, CONTROL_UNIT_LIMIT};
use crate::{Error, Result};

/// Control channel over TCP, confirmed by a derived banner
pub struct TcpControlChannel {
    channel_id: String,
}

impl TcpControlChannel {
    /// `channel_id` is the identifier both passphrase holders derive;
    /// see [`crate::crypto::KeyChain::channel_id`]
    pub fn new(channel_id: String) -> Self {
        Self { channel_id }
    }
}

#[async_trait]
impl ControlChannel for TcpControlChannel {
    fn is_powered_on(&self) -> bool {
        // The NIC stands in for the radio: no non-loopback interface means
        // the link layer is down
        get_if_addrs::get_if_addrs()
            .map(|ifaces| ifaces.iter().any(|i| !i.is_loopback()))
            .unwrap_or(false)
    }

    async fn open(&self, address: &str) -> Result<Box<dyn ControlLink>> {
        let addr: std::net::SocketAddr = address
            .parse()
            .map_err(|_| Error::Network(format!("invalid peer address {}", address)))?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        stream.set_nodelay(true).ok();

        Ok(Box::new(TcpControlLink {
            stream,
            channel_id: self.channel_id.clone(),
        }))
    }
}

struct TcpControlLink {
    stream: TcpStream,
    channel_id: String,
}

#[async_trait]
impl ControlLink for TcpControlLink {
    fn mtu(&self) -> usize {
        CONTROL_MTU
    }

    async fn confirm_endpoint(&mut self) -> Result<()> {
        write_unit(&mut self.stream, self.channel_id.as_bytes()).await?;

        let banner = read_unit(&mut self.stream)
            .await?
            .ok_or_else(|| Error::Network("closed during endpoint confirmation".to_string()))?;
        if banner != self.channel_id.as_bytes() {
            return Err(Error::Protocol("peer endpoint mismatch".to_string()));
        }
        Ok(())
    }

    fn split(self: Box<Self>) -> (Box<dyn LinkReader>, Box<dyn LinkWriter>) {
        let (read_half, write_half) = self.stream.into_split();
        (
            Box::new(TcpLinkReader { half: read_half }),
            Box::new(TcpLinkWriter { half: write_half }),
        )
    }
}

struct TcpLinkReader {
    half: OwnedReadHalf,
}

#[async_trait]
impl LinkReader for TcpLinkReader {
    async fn next_unit(&mut self) -> Result<Option<Vec<u8>>> {
        read_unit(&mut self.half).await
    }
}

struct TcpLinkWriter {
    half: OwnedWriteHalf,
}

#[async_trait]
impl LinkWriter for TcpLinkWriter {
    async fn write_unit(&mut self, unit: &[u8]) -> Result<()> {
        write_unit(&mut self.half, unit).await
    }

    async fn close(&mut self) {
        let _ = self.half.shutdown().await;
    }
}

/// Read one length-prefixed unit; `Ok(None)` on orderly close
async fn read_unit<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Network(e.to_string())),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > CONTROL_UNIT_LIMIT {
        return Err(Error::Protocol(format!(
            "control unit of {} bytes exceeds limit {}",
            len, CONTROL_UNIT_LIMIT
        )));
    }

    let mut unit = vec![0u8; len];
    reader
        .read_exact(&mut unit)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    Ok(Some(unit))
}

/// Write one length-prefixed unit and flush it
async fn write_unit<W: AsyncWrite + Unpin>(writer: &mut W, unit: &[u8]) -> Result<()> {
    writer
        .write_all(&(unit.len() as u32).to_be_bytes())
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .write_all(unit)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;
    writer
        .flush()
        .await
        .map_err(|e| Error::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal peer endpoint: echoes the banner, then echoes units
    async fn spawn_peer(banner: Option<String>) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let received = read_unit(&mut stream).await.unwrap().unwrap();
            let reply = banner
                .map(|b| b.into_bytes())
                .unwrap_or_else(|| received.clone());
            write_unit(&mut stream, &reply).await.unwrap();

            while let Ok(Some(unit)) = read_unit(&mut stream).await {
                if write_unit(&mut stream, &unit).await.is_err() {
                    break;
                }
            }
        });

        addr
    }

    #[tokio::test]
    async fn test_confirm_and_echo() {
        let addr = spawn_peer(None).await;
        let channel = TcpControlChannel::new("chan-1".to_string());

        let mut link = channel.open(&addr.to_string()).await.unwrap();
        link.confirm_endpoint().await.unwrap();
        assert_eq!(link.mtu(), CONTROL_MTU);

        let (mut reader, mut writer) = link.split();
        writer.write_unit(b"unit").await.unwrap();
        assert_eq!(reader.next_unit().await.unwrap().unwrap(), b"unit");

        writer.close().await;
    }

    #[tokio::test]
    async fn test_wrong_banner_rejected() {
        let addr = spawn_peer(Some("someone-else".to_string())).await;
        let channel = TcpControlChannel::new("chan-1".to_string());

        let mut link = channel.open(&addr.to_string()).await.unwrap();
        assert!(matches!(
            link.confirm_endpoint().await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_open_unreachable_address() {
        let channel = TcpControlChannel::new("chan-1".to_string());
        assert!(channel.open("127.0.0.1:1").await.is_err());
        assert!(channel.open("not an address").await.is_err());
    }
}
