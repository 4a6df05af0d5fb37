//! Codec — the `{code, msg}` wire envelope and frame I/O.
//!
//! Server→client: exactly one JSON object per logical message, followed by a
//! flush and a cooperative yield so distinct frames don't coalesce on the
//! peer's read. Client→server: a raw, best-effort buffered chunk, whitespace
//! stripped at the edges.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::ChatError;

/// Default read buffer for client→server chunks.
pub const DEFAULT_BUFFER: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Code {
    SUCCESS,
    WRITE_BACK,
    NO_WRITE_BACK,
    AUTH,
    EXIT,
    ERROR,
    SALT,
}

/// The server→client framed envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub code: Code,
    pub msg: String,
}

impl Envelope {
    pub fn new(code: Code, msg: impl Into<String>) -> Self {
        Self {
            code,
            msg: msg.into(),
        }
    }
}

/// Write exactly one frame and flush. A short cooperative yield follows so a
/// fast consecutive write doesn't land in the same read on the peer.
pub async fn write_frame<W>(writer: &mut W, code: Code, msg: &str) -> Result<(), ChatError>
where
    W: AsyncWriteExt + Unpin,
{
    let envelope = Envelope::new(code, msg);
    let bytes =
        serde_json::to_vec(&envelope).map_err(|e| ChatError::DecodeError(e.to_string()))?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    tokio::task::yield_now().await;
    Ok(())
}

/// Parse a received frame as the envelope. Used where a peer is expected to
/// echo a framed reply (tests, and any future client-side consumer).
pub fn decode_envelope(raw: &str) -> Result<Envelope, ChatError> {
    serde_json::from_str(raw).map_err(|e| ChatError::DecodeError(e.to_string()))
}

/// Read one best-effort buffered chunk from the client, stripped of
/// surrounding whitespace. Fails with `ShortRead` on a zero-byte read.
pub async fn read_command<R>(reader: &mut R, buffer_size: usize) -> Result<String, ChatError>
where
    R: AsyncReadExt + Unpin,
{
    let mut buf = vec![0u8; buffer_size];
    let n = reader.read(&mut buf).await?;
    if n == 0 {
        return Err(ChatError::ShortRead);
    }
    Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
}
