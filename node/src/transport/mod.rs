//! Collective transport for a fixed, ranked group of processes.
//!
//! The engine only ever talks to a [`CollectiveTransport`]. Two variants
//! exist, both built on the same star protocol in [`star`]:
//!
//! - [`local`]: every rank lives in the current process and frames travel
//!   over tokio channels. Used by tests and by `mm-node local`.
//! - [`tcp`]: one OS process per rank, rank 0 listens and every other rank
//!   connects to it. Used for real benchmark runs.
//!
//! ```text
//!            enter (+ gather payload)
//!   rank 1 ───────────────────────────┐
//!   rank 2 ─────────────────────────┐ │
//!                                   ▼ ▼
//!                                ┌────────┐
//!                                │ rank 0 │  waits for every enter,
//!                                └────────┘  then releases each peer
//!                                   │ │
//!   rank 2 ◄────────────────────────┘ │
//!   rank 1 ◄──────────────────────────┘
//!            release (+ broadcast / scatter payload)
//! ```

pub mod frame;
pub mod local;
pub mod star;
pub mod tcp;

pub use frame::{CollectiveFrame, CollectiveOp, Handshake, DEFAULT_MAX_FRAME_BYTES};
pub use local::{local_group, ChannelLink, LocalTransport};
pub use star::{Link, StarCommunicator};
pub use tcp::{connect_worker, TcpLink, TcpOptions, TcpRendezvous, TcpTransport};

use crate::errors::{NodeError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Rank of the coordinator, which owns full operands and reassembles results.
pub const COORDINATOR_RANK: usize = 0;

/// This process's identity within its group.
///
/// Passed explicitly through every core operation instead of living in
/// global state, so one process can host several logical ranks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupContext {
    /// This process's rank (0 to world_size-1)
    pub rank: usize,
    /// Total number of ranks, coordinator included
    pub world_size: usize,
}

impl GroupContext {
    /// Validate and build a context.
    pub fn new(rank: usize, world_size: usize) -> Result<Self> {
        if world_size == 0 {
            return Err(NodeError::Config("World size must be at least 1".into()));
        }
        if rank >= world_size {
            return Err(NodeError::Config(format!(
                "Rank {} out of range for world size {}",
                rank, world_size
            )));
        }
        Ok(Self { rank, world_size })
    }

    pub fn is_coordinator(&self) -> bool {
        self.rank == COORDINATOR_RANK
    }
}

/// Blocking collective operations over `f64` buffers.
///
/// Every call is a synchronization point: no rank returns from a call until
/// every rank in the group has entered it. All ranks must issue the same
/// sequence of calls with the same `root`; divergence is reported as
/// [`NodeError::Transport`] when detectable and may otherwise deadlock.
#[async_trait]
pub trait CollectiveTransport: Send {
    /// This endpoint's rank and group size.
    fn context(&self) -> GroupContext;

    /// Replicate `root`'s buffer into every rank's `buffer`.
    ///
    /// All ranks must pass buffers of the same length.
    async fn broadcast(&mut self, buffer: &mut [f64], root: usize) -> Result<()>;

    /// Split `send` (only read on `root`) into `world_size` contiguous chunks
    /// and deliver chunk `i` into rank `i`'s `recv`.
    ///
    /// On `root`, `send` must be `Some` and exactly `recv.len() * world_size` long.
    async fn scatter(&mut self, send: Option<&[f64]>, recv: &mut [f64], root: usize)
        -> Result<()>;

    /// Inverse of scatter: rank `i`'s `send` lands at offset `i * send.len()`
    /// of `recv` on `root`.
    ///
    /// On `root`, `recv` must be `Some` and exactly `send.len() * world_size` long.
    async fn gather(&mut self, send: &[f64], recv: Option<&mut [f64]>, root: usize)
        -> Result<()>;
}
