//! Wire protocol for the TCP transport.
//!
//! Every frame is a 4-byte big-endian length prefix followed by a UTF-8 JSON
//! object tagged by `type`. Frames of many calls are interleaved on one
//! connection and told apart by `call_id`.
//!
//! ```text
//! [u32 BE: len][UTF-8 JSON bytes of len]
//! ```

use crate::call::{CallId, CallShape};
use crate::config::TransportConfig;
use crate::error::{Result, RpcError, Status};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// One protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Client opens a call.
    Open {
        call_id: CallId,
        method: String,
        shape: CallShape,
        /// Time left before the client's deadline, if it has one.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    /// One message in the sender's direction.
    Message {
        call_id: CallId,
        payload: serde_json::Value,
    },
    /// The sender half-closed its direction.
    HalfClose { call_id: CallId },
    /// Server terminated the call with an error.
    Status { call_id: CallId, status: Status },
    /// Client abandoned the call.
    Cancel { call_id: CallId },
}

impl Frame {
    pub fn call_id(&self) -> CallId {
        match self {
            Frame::Open { call_id, .. }
            | Frame::Message { call_id, .. }
            | Frame::HalfClose { call_id }
            | Frame::Status { call_id, .. }
            | Frame::Cancel { call_id } => *call_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Open { .. } => "open",
            Frame::Message { .. } => "message",
            Frame::HalfClose { .. } => "half_close",
            Frame::Status { .. } => "status",
            Frame::Cancel { .. } => "cancel",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| RpcError::Json {
            message: format!("Failed to parse frame: {}", e),
            source: Some(e),
        })
    }
}

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF (peer closed connection).
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;

    if len > TransportConfig::MAX_FRAME_SIZE {
        return Err(RpcError::transport(format!(
            "frame size {} exceeds maximum {}",
            len,
            TransportConfig::MAX_FRAME_SIZE
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > TransportConfig::MAX_FRAME_SIZE {
        return Err(RpcError::transport(format!(
            "frame size {} exceeds maximum {}",
            payload.len(),
            TransportConfig::MAX_FRAME_SIZE
        )));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
