//! Blob announcement and chunk payloads
//!
//! A blob crosses the stream channel as one announcement frame followed by
//! an unbroken sequence of chunk frames. There is no per-chunk ack; the
//! underlying stream already guarantees order and delivery.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::constants::CHUNK_SIZE;
use crate::protocol::{BlobInfo, PayloadKind};
use crate::stream::session::StreamSession;
use crate::Result;

/// Payload frames exchanged on the stream channel, bincode-encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamPayload {
    /// Metadata preceding a chunk sequence
    Announce {
        id: String,
        name: String,
        kind: PayloadKind,
        total_size: u64,
    },
    /// One slice of blob data at an absolute offset
    Chunk {
        id: String,
        offset: u64,
        data: Vec<u8>,
    },
}

impl StreamPayload {
    pub fn announce(info: &BlobInfo) -> Self {
        StreamPayload::Announce {
            id: info.id.clone(),
            name: info.name.clone(),
            kind: info.kind,
            total_size: info.total_size,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Stream a blob over an open session: announcement first, then fixed-size
/// chunks until the input is exhausted. `on_progress` sees the running
/// byte count after each chunk.
pub async fn send_blob<R, F>(
    session: &StreamSession,
    info: &BlobInfo,
    reader: &mut R,
    mut on_progress: F,
) -> Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
    F: FnMut(u64),
{
    session.send(StreamPayload::announce(info).encode()?).await?;

    let mut offset = 0u64;
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let chunk = StreamPayload::Chunk {
            id: info.id.clone(),
            offset,
            data: buf[..n].to_vec(),
        };
        session.send(chunk.encode()?).await?;
        offset += n as u64;
        on_progress(offset);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::session::{SessionConfig, SessionEvent, StreamSession};
    use std::io::Cursor;
    use tokio::io::duplex;

    #[test]
    fn test_payload_codec_roundtrip() {
        let payload = StreamPayload::Chunk {
            id: "b1".to_string(),
            offset: 65536,
            data: vec![1, 2, 3],
        };
        let bytes = payload.encode().unwrap();
        assert_eq!(StreamPayload::decode(&bytes).unwrap(), payload);
    }

    #[tokio::test]
    async fn test_send_blob_chunks_in_order() {
        let (ours, theirs) = duplex(1024 * 1024);
        let (session, _events) = StreamSession::spawn(ours, SessionConfig { keepalive: false });
        let (_sink, mut sink_events) = StreamSession::spawn(theirs, SessionConfig { keepalive: false });

        let content: Vec<u8> = (0..200_000).map(|i| (i % 251) as u8).collect();
        let info = BlobInfo {
            id: "b1".to_string(),
            name: "data.bin".to_string(),
            kind: PayloadKind::File,
            total_size: content.len() as u64,
        };

        let mut progress = Vec::new();
        let mut reader = Cursor::new(content.clone());
        let send = send_blob(&session, &info, &mut reader, |sent| progress.push(sent));

        let receive = async {
            let mut frames = Vec::new();
            while let Some(event) = sink_events.recv().await {
                if let SessionEvent::Payload(bytes) = event {
                    frames.push(StreamPayload::decode(&bytes).unwrap());
                    if frames.len() == 5 {
                        break;
                    }
                }
            }
            frames
        };

        let (send_result, frames) = tokio::join!(send, receive);
        send_result.unwrap();

        // 200_000 bytes = 3 full 64 KiB chunks + 1 short one, after the announce
        assert_eq!(frames.len(), 5);
        assert_eq!(frames[0], StreamPayload::announce(&info));

        let mut rebuilt = vec![0u8; content.len()];
        for frame in &frames[1..] {
            match frame {
                StreamPayload::Chunk { id, offset, data } => {
                    assert_eq!(id, "b1");
                    rebuilt[*offset as usize..*offset as usize + data.len()]
                        .copy_from_slice(data);
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }
        assert_eq!(rebuilt, content);
        assert_eq!(progress.last().copied(), Some(content.len() as u64));
    }
}
