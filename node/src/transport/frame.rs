// Wire frames for the collective protocol, length-prefixed CBOR over any async stream

use crate::errors::{NodeError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

/// Default maximum encoded frame size (1 GiB).
///
/// A 6000 x 6000 `f64` operand encodes to roughly 330 MB of CBOR.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// Which collective a frame belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectiveOp {
    Broadcast,
    Scatter,
    Gather,
}

/// One step of a collective exchange between a rank and the root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectiveFrame {
    /// Collective this frame belongs to
    pub op: CollectiveOp,
    /// Per-communicator call counter; identical on every rank for the same call
    pub seq: u64,
    /// Data carried by the frame (empty for pure enter/release signals)
    pub payload: Vec<f64>,
}

impl CollectiveFrame {
    pub fn new(op: CollectiveOp, seq: u64, payload: Vec<f64>) -> Self {
        Self { op, seq, payload }
    }

    /// A frame with no payload
    pub fn signal(op: CollectiveOp, seq: u64) -> Self {
        Self::new(op, seq, Vec::new())
    }

    /// Check that this frame belongs to the expected call.
    ///
    /// A mismatch means two ranks issued different collective sequences.
    pub fn verify(self, op: CollectiveOp, seq: u64, from: usize) -> Result<Self> {
        if self.op != op || self.seq != seq {
            return Err(NodeError::Transport(format!(
                "Collective mismatch with rank {}: expected {:?}#{}, got {:?}#{}",
                from, op, seq, self.op, self.seq
            )));
        }
        Ok(self)
    }
}

/// Rendezvous messages exchanged before any collective runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Handshake {
    /// Worker -> coordinator: identify and join the run
    Hello {
        rank: usize,
        world_size: usize,
        run_id: Uuid,
    },
    /// Coordinator -> worker: every rank has joined
    Ready { world_size: usize },
}

/// Write a length-prefixed CBOR message to an async stream
pub async fn write_frame<T, M>(io: &mut T, message: &M, max_frame_bytes: usize) -> Result<()>
where
    T: AsyncWrite + Unpin + Send,
    M: Serialize + ?Sized,
{
    // Serialize to CBOR
    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf)
        .map_err(|e| NodeError::Serialization(e.to_string()))?;

    // Length prefix is a u32, so the hard ceiling is u32::MAX regardless of config
    if buf.len() > max_frame_bytes || buf.len() > u32::MAX as usize {
        return Err(NodeError::Transport(format!(
            "Frame size {} exceeds limit {}",
            buf.len(),
            max_frame_bytes.min(u32::MAX as usize)
        )));
    }

    io.write_all(&(buf.len() as u32).to_be_bytes())
        .await
        .map_err(|e| NodeError::Transport(format!("Failed to write frame header: {}", e)))?;
    io.write_all(&buf)
        .await
        .map_err(|e| NodeError::Transport(format!("Failed to write frame body: {}", e)))?;
    io.flush()
        .await
        .map_err(|e| NodeError::Transport(format!("Failed to flush frame: {}", e)))?;

    Ok(())
}

/// Read a length-prefixed CBOR message from an async stream
pub async fn read_frame<T, M>(io: &mut T, max_frame_bytes: usize) -> Result<M>
where
    T: AsyncRead + Unpin + Send,
    M: DeserializeOwned,
{
    // Read u32 length prefix (big-endian)
    let mut len_buf = [0u8; 4];
    io.read_exact(&mut len_buf)
        .await
        .map_err(|e| NodeError::Transport(format!("Failed to read frame header: {}", e)))?;
    let len = u32::from_be_bytes(len_buf) as usize;

    // Enforce size limit
    if len > max_frame_bytes {
        return Err(NodeError::Transport(format!(
            "Frame size {} exceeds limit {}",
            len, max_frame_bytes
        )));
    }

    // Read CBOR payload
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| NodeError::Allocation { elements: len })?;
    buf.resize(len, 0u8);
    io.read_exact(&mut buf)
        .await
        .map_err(|e| NodeError::Transport(format!("Failed to read frame body: {}", e)))?;

    ciborium::from_reader(&buf[..]).map_err(|e| NodeError::Serialization(e.to_string()))
}
