//! Star-topology collectives over point-to-point links.
//!
//! Every collective follows the same two-phase exchange with the root:
//!
//! 1. **Enter**: each non-root rank sends one frame to the root (carrying its
//!    chunk for gather, empty otherwise). The root receives these in
//!    ascending rank order.
//! 2. **Release**: once every enter has arrived, the root sends one frame to
//!    each peer (carrying the data for broadcast/scatter, empty for gather).
//!
//! A non-root cannot leave a call before the root has heard from every rank,
//! and the root cannot leave before every rank has entered, so each call is
//! a full barrier.

use super::frame::{CollectiveFrame, CollectiveOp};
use super::{CollectiveTransport, GroupContext};
use crate::errors::{NodeError, Result};
use async_trait::async_trait;
use tracing::trace;

/// Point-to-point frame channel between this rank and its peers.
#[async_trait]
pub trait Link: Send {
    /// Send a frame to `peer`.
    async fn send(&mut self, peer: usize, frame: &CollectiveFrame) -> Result<()>;

    /// Receive the next frame from `peer`, waiting as long as it takes.
    async fn recv(&mut self, peer: usize) -> Result<CollectiveFrame>;
}

/// [`CollectiveTransport`] implemented as a star around the root over any [`Link`].
pub struct StarCommunicator<L> {
    ctx: GroupContext,
    link: L,
    seq: u64,
}

impl<L: Link> StarCommunicator<L> {
    pub fn new(ctx: GroupContext, link: L) -> Self {
        Self { ctx, link, seq: 0 }
    }

    /// Number of collectives this endpoint has entered so far.
    pub fn calls_issued(&self) -> u64 {
        self.seq
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.seq;
        self.seq += 1;
        seq
    }

    fn check_root(&self, root: usize) -> Result<()> {
        if root >= self.ctx.world_size {
            return Err(NodeError::Config(format!(
                "Root rank {} out of range for world size {}",
                root, self.ctx.world_size
            )));
        }
        Ok(())
    }

    /// Root side of phase 1: one enter frame from every peer, ascending by rank.
    async fn collect_entries(
        &mut self,
        op: CollectiveOp,
        seq: u64,
        root: usize,
    ) -> Result<Vec<(usize, CollectiveFrame)>> {
        let mut entries = Vec::with_capacity(self.ctx.world_size.saturating_sub(1));
        for peer in peers(self.ctx, root) {
            let frame = self.link.recv(peer).await?.verify(op, seq, peer)?;
            trace!(peer, ?op, seq, "collective entry received");
            entries.push((peer, frame));
        }
        Ok(entries)
    }

    /// Non-root side: send the enter frame, then wait for the root's release.
    async fn enter_and_wait(
        &mut self,
        op: CollectiveOp,
        seq: u64,
        root: usize,
        payload: Vec<f64>,
    ) -> Result<CollectiveFrame> {
        self.link
            .send(root, &CollectiveFrame::new(op, seq, payload))
            .await?;
        self.link.recv(root).await?.verify(op, seq, root)
    }
}

#[async_trait]
impl<L: Link> CollectiveTransport for StarCommunicator<L> {
    fn context(&self) -> GroupContext {
        self.ctx
    }

    async fn broadcast(&mut self, buffer: &mut [f64], root: usize) -> Result<()> {
        self.check_root(root)?;
        let seq = self.next_seq();
        let op = CollectiveOp::Broadcast;

        if self.ctx.rank == root {
            self.collect_entries(op, seq, root).await?;
            let release = CollectiveFrame::new(op, seq, buffer.to_vec());
            for peer in peers(self.ctx, root) {
                self.link.send(peer, &release).await?;
            }
        } else {
            let frame = self.enter_and_wait(op, seq, root, Vec::new()).await?;
            copy_payload(buffer, &frame.payload, op)?;
        }

        Ok(())
    }

    async fn scatter(
        &mut self,
        send: Option<&[f64]>,
        recv: &mut [f64],
        root: usize,
    ) -> Result<()> {
        self.check_root(root)?;
        let seq = self.next_seq();
        let op = CollectiveOp::Scatter;
        let chunk = recv.len();

        if self.ctx.rank == root {
            let send = send.ok_or_else(|| {
                NodeError::Shape("Scatter root must supply a send buffer".into())
            })?;
            expect_len(send.len(), chunk * self.ctx.world_size, "scatter send buffer")?;

            self.collect_entries(op, seq, root).await?;
            for peer in peers(self.ctx, root) {
                let part = send[peer * chunk..(peer + 1) * chunk].to_vec();
                self.link
                    .send(peer, &CollectiveFrame::new(op, seq, part))
                    .await?;
            }
            recv.copy_from_slice(&send[root * chunk..(root + 1) * chunk]);
        } else {
            let frame = self.enter_and_wait(op, seq, root, Vec::new()).await?;
            copy_payload(recv, &frame.payload, op)?;
        }

        Ok(())
    }

    async fn gather(
        &mut self,
        send: &[f64],
        recv: Option<&mut [f64]>,
        root: usize,
    ) -> Result<()> {
        self.check_root(root)?;
        let seq = self.next_seq();
        let op = CollectiveOp::Gather;
        let chunk = send.len();

        if self.ctx.rank == root {
            let recv = recv.ok_or_else(|| {
                NodeError::Shape("Gather root must supply a receive buffer".into())
            })?;
            expect_len(recv.len(), chunk * self.ctx.world_size, "gather receive buffer")?;

            // Position is the only record of origin: rank i lands at offset i * chunk
            for (peer, frame) in self.collect_entries(op, seq, root).await? {
                copy_payload(&mut recv[peer * chunk..(peer + 1) * chunk], &frame.payload, op)?;
            }
            recv[root * chunk..(root + 1) * chunk].copy_from_slice(send);

            let release = CollectiveFrame::signal(op, seq);
            for peer in peers(self.ctx, root) {
                self.link.send(peer, &release).await?;
            }
        } else {
            self.enter_and_wait(op, seq, root, send.to_vec()).await?;
        }

        Ok(())
    }
}

/// Every rank except `root`, ascending.
fn peers(ctx: GroupContext, root: usize) -> impl Iterator<Item = usize> {
    (0..ctx.world_size).filter(move |&rank| rank != root)
}

fn expect_len(actual: usize, expected: usize, what: &str) -> Result<()> {
    if actual != expected {
        return Err(NodeError::Shape(format!(
            "{} has {} elements, expected {}",
            what, actual, expected
        )));
    }
    Ok(())
}

/// Copy a received payload into a local buffer.
///
/// A length mismatch here means the peer's view of the run differs from ours.
fn copy_payload(dst: &mut [f64], payload: &[f64], op: CollectiveOp) -> Result<()> {
    if dst.len() != payload.len() {
        return Err(NodeError::Transport(format!(
            "{:?} payload has {} elements, expected {}",
            op,
            payload.len(),
            dst.len()
        )));
    }
    dst.copy_from_slice(payload);
    Ok(())
}
