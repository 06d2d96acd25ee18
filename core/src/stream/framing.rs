//! Length-prefixed framing for the stream channel
//!
//! Each frame starts with a 4-byte big-endian i32. Two values are reserved
//! as control sentinels rather than payload lengths: `0` is a PING and `-1`
//! a PONG. Every other value must be a payload length in `[1, MAX_PAYLOAD]`;
//! anything else is a protocol violation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::constants::{MAX_PAYLOAD, PING_SENTINEL, PONG_SENTINEL};
use crate::{Error, Result};

/// One unit on the stream channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ping,
    Pong,
    Payload(Vec<u8>),
}

/// Read the next frame.
///
/// `Ok(None)` means the peer closed the connection at a frame boundary.
/// An out-of-range length is a [`Error::Protocol`]; I/O failures, including
/// a connection cut mid-frame, are [`Error::Network`].
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(Error::Network(e.to_string())),
    }

    let len = i32::from_be_bytes(len_buf);
    match len {
        PING_SENTINEL => Ok(Some(Frame::Ping)),
        PONG_SENTINEL => Ok(Some(Frame::Pong)),
        l if l > 0 && (l as usize) <= MAX_PAYLOAD => {
            let mut payload = vec![0u8; l as usize];
            reader
                .read_exact(&mut payload)
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            Ok(Some(Frame::Payload(payload)))
        }
        l => Err(Error::Protocol(format!("invalid frame length {}", l))),
    }
}

/// Write one frame and flush it
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Frame) -> Result<()> {
    match frame {
        Frame::Ping => {
            writer
                .write_all(&PING_SENTINEL.to_be_bytes())
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
        }
        Frame::Pong => {
            writer
                .write_all(&PONG_SENTINEL.to_be_bytes())
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
        }
        Frame::Payload(payload) => {
            if payload.is_empty() || payload.len() > MAX_PAYLOAD {
                return Err(Error::Protocol(format!(
                    "payload of {} bytes outside [1, {}]",
                    payload.len(),
                    MAX_PAYLOAD
                )));
            }
            writer
                .write_all(&(payload.len() as i32).to_be_bytes())
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
            writer
                .write_all(payload)
                .await
                .map_err(|e| Error::Network(e.to_string()))?;
        }
    }

    writer
        .flush()
        .await
        .map_err(|e| Error::Network(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    async fn roundtrip(frame: Frame) -> Frame {
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &frame).await.unwrap();
        let mut cursor = Cursor::new(buffer);
        read_frame(&mut cursor).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_payload_roundtrip() {
        let frame = roundtrip(Frame::Payload(b"hello".to_vec())).await;
        assert_eq!(frame, Frame::Payload(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_sentinels_are_control_frames() {
        assert_eq!(roundtrip(Frame::Ping).await, Frame::Ping);
        assert_eq!(roundtrip(Frame::Pong).await, Frame::Pong);

        // On the wire they are bare length words with no payload bytes
        let mut buffer = Vec::new();
        write_frame(&mut buffer, &Frame::Ping).await.unwrap();
        assert_eq!(buffer, PING_SENTINEL.to_be_bytes());
        buffer.clear();
        write_frame(&mut buffer, &Frame::Pong).await.unwrap();
        assert_eq!(buffer, PONG_SENTINEL.to_be_bytes());
    }

    #[tokio::test]
    async fn test_oversized_length_is_protocol_violation() {
        let raw = ((MAX_PAYLOAD + 1) as i32).to_be_bytes();
        let mut cursor = Cursor::new(raw.to_vec());
        match read_frame(&mut cursor).await {
            Err(Error::Protocol(_)) => {}
            other => panic!("expected protocol violation, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_negative_length_is_protocol_violation() {
        let raw = (-2i32).to_be_bytes();
        let mut cursor = Cursor::new(raw.to_vec());
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_on_write() {
        let mut buffer = Vec::new();
        assert!(matches!(
            write_frame(&mut buffer, &Frame::Payload(Vec::new())).await,
            Err(Error::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_eof_at_boundary_is_clean_close() {
        let mut cursor = Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_network_error() {
        let mut raw = 10i32.to_be_bytes().to_vec();
        raw.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(raw);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(Error::Network(_))
        ));
    }
}
