//! Length-prefixed framing for the TCP side of the tunnel.
//!
//! Every datagram crosses the stream as one frame:
//! `[2-byte payload length (big-endian)][payload]`
//!
//! There is no magic number, version field, or checksum. Frames sit
//! back-to-back on the stream, so a single malformed length field
//! desynchronizes the connection permanently; decoding therefore fails the
//! session on any short read instead of guessing.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 2;

/// Largest payload a 16-bit length prefix can describe.
pub const MAX_PAYLOAD_SIZE: usize = u16::MAX as usize;

/// Errors that can occur while framing or deframing.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("payload of {0} bytes exceeds the {MAX_PAYLOAD_SIZE}-byte frame limit")]
    PayloadTooLarge(usize),

    #[error("stream ended mid-frame")]
    Truncated,

    #[error("frame read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Encodes a datagram payload as a single frame ready to be written to the
/// stream.
///
/// Returns `FrameError::PayloadTooLarge` if the payload cannot be described
/// by the 16-bit length prefix. No partial frame is ever produced.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Reads exactly one frame from the stream and returns its payload.
///
/// Reads the 2-byte length prefix, then exactly that many payload bytes. A
/// short read at either step (including EOF on a closed connection) is fatal
/// for the session: the stream has no resynchronization point, so the caller
/// must not read from it again.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LENGTH_PREFIX_SIZE];
    reader.read_exact(&mut len_buf).await.map_err(short_read)?;

    let length = u16::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await.map_err(short_read)?;

    Ok(payload)
}

fn short_read(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::Truncated
    } else {
        FrameError::Io(e)
    }
}
