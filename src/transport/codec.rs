//! Length-prefixed JSON framing.
//!
//! Each frame is a 4-byte big-endian length followed by a JSON envelope that
//! carries the correlation id of the exchange.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::{Request, Response};
use crate::transport::{TransportError, TransportResult};

/// Request envelope sent to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: Request,
}

/// Response envelope returned by a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub response: Response,
}

/// Serialize `message` into a complete frame, prefix included.
pub fn encode<T: Serialize>(message: &T, max_frame_bytes: usize) -> TransportResult<Vec<u8>> {
    let payload = serde_json::to_vec(message)?;
    if payload.len() > max_frame_bytes || payload.len() > u32::MAX as usize {
        return Err(TransportError::FrameTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

pub fn decode<T: DeserializeOwned>(payload: &[u8]) -> TransportResult<T> {
    Ok(serde_json::from_slice(payload)?)
}

/// Read one frame payload.
///
/// Returns `Ok(None)` on a clean end of stream at a frame boundary. A stream
/// that ends partway through the prefix or payload is an error.
pub async fn read_frame<R>(reader: &mut R, max_frame_bytes: usize) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; 4];
    let mut filled = 0;
    while filled < prefix.len() {
        let n = reader.read(&mut prefix[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of 4 prefix bytes", filled),
            )
            .into());
        }
        filled += n;
    }

    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_bytes {
        return Err(TransportError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write an encoded frame and flush it.
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}
