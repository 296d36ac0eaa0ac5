//! In-process collective group: every rank is a task in the current process.

use super::frame::CollectiveFrame;
use super::star::{Link, StarCommunicator};
use super::GroupContext;
use crate::errors::{NodeError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// Channel-backed link with a dedicated queue per (sender, receiver) pair.
pub struct ChannelLink {
    rank: usize,
    outboxes: Vec<Option<UnboundedSender<CollectiveFrame>>>,
    inboxes: Vec<Option<UnboundedReceiver<CollectiveFrame>>>,
}

/// Collective endpoint for one simulated rank.
pub type LocalTransport = StarCommunicator<ChannelLink>;

/// Build a fully connected group of `world_size` in-process endpoints.
///
/// Endpoint `i` of the returned vector is rank `i`. Each endpoint is meant
/// to be driven by its own task; dropping one makes its peers' next
/// exchange with it fail with [`NodeError::Transport`].
pub fn local_group(world_size: usize) -> Result<Vec<LocalTransport>> {
    if world_size == 0 {
        return Err(NodeError::Config("World size must be at least 1".into()));
    }

    let mut outboxes: Vec<Vec<Option<UnboundedSender<CollectiveFrame>>>> = (0..world_size)
        .map(|_| (0..world_size).map(|_| None).collect())
        .collect();
    let mut inboxes: Vec<Vec<Option<UnboundedReceiver<CollectiveFrame>>>> = (0..world_size)
        .map(|_| (0..world_size).map(|_| None).collect())
        .collect();

    for from in 0..world_size {
        for to in 0..world_size {
            if from == to {
                continue;
            }
            let (tx, rx) = unbounded_channel();
            outboxes[from][to] = Some(tx);
            inboxes[to][from] = Some(rx);
        }
    }

    outboxes
        .into_iter()
        .zip(inboxes)
        .enumerate()
        .map(|(rank, (outboxes, inboxes))| {
            let ctx = GroupContext::new(rank, world_size)?;
            Ok(StarCommunicator::new(
                ctx,
                ChannelLink {
                    rank,
                    outboxes,
                    inboxes,
                },
            ))
        })
        .collect()
}

#[async_trait]
impl Link for ChannelLink {
    async fn send(&mut self, peer: usize, frame: &CollectiveFrame) -> Result<()> {
        let outbox = self
            .outboxes
            .get(peer)
            .and_then(Option::as_ref)
            .ok_or_else(|| no_route(self.rank, peer))?;

        outbox
            .send(frame.clone())
            .map_err(|_| NodeError::Transport(format!("Rank {} hung up", peer)))
    }

    async fn recv(&mut self, peer: usize) -> Result<CollectiveFrame> {
        let rank = self.rank;
        let inbox = self
            .inboxes
            .get_mut(peer)
            .and_then(Option::as_mut)
            .ok_or_else(|| no_route(rank, peer))?;

        inbox
            .recv()
            .await
            .ok_or_else(|| NodeError::Transport(format!("Rank {} hung up", peer)))
    }
}

fn no_route(rank: usize, peer: usize) -> NodeError {
    NodeError::Transport(format!("No route from rank {} to rank {}", rank, peer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CollectiveTransport;

    #[test]
    fn test_group_ranks_are_positional() {
        let group = local_group(3).unwrap();
        for (i, endpoint) in group.iter().enumerate() {
            assert_eq!(endpoint.context().rank, i);
            assert_eq!(endpoint.context().world_size, 3);
        }
    }

    #[test]
    fn test_empty_group_rejected() {
        assert!(local_group(0).is_err());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_rank() {
        let mut handles = Vec::new();
        for mut endpoint in local_group(4).unwrap() {
            handles.push(tokio::spawn(async move {
                let mut buf = if endpoint.context().is_coordinator() {
                    vec![1.0, 2.0, 3.0]
                } else {
                    vec![0.0; 3]
                };
                endpoint.broadcast(&mut buf, 0).await.unwrap();
                buf
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), vec![1.0, 2.0, 3.0]);
        }
    }

    #[tokio::test]
    async fn test_scatter_then_gather_preserves_rank_order() {
        let world = 3;
        let mut handles = Vec::new();
        for mut endpoint in local_group(world).unwrap() {
            handles.push(tokio::spawn(async move {
                let ctx = endpoint.context();
                let full: Vec<f64> = (0..6).map(|x| x as f64).collect();
                let send = ctx.is_coordinator().then_some(full.as_slice());

                let mut chunk = vec![0.0; 2];
                endpoint.scatter(send, &mut chunk, 0).await.unwrap();
                let received = chunk.clone();

                // Tag each chunk with the rank that holds it
                for value in chunk.iter_mut() {
                    *value += 100.0 * ctx.rank as f64;
                }

                let mut gathered = vec![0.0; 6];
                let recv = ctx.is_coordinator().then_some(gathered.as_mut_slice());
                endpoint.gather(&chunk, recv, 0).await.unwrap();
                (ctx.rank, received, gathered)
            }));
        }

        for handle in handles {
            let (rank, received, gathered) = handle.await.unwrap();
            let base = (rank * 2) as f64;
            assert_eq!(received, vec![base, base + 1.0]);
            if rank == 0 {
                assert_eq!(gathered, vec![0.0, 1.0, 102.0, 103.0, 204.0, 205.0]);
            }
        }
    }

    #[tokio::test]
    async fn test_non_zero_root() {
        let mut handles = Vec::new();
        for mut endpoint in local_group(3).unwrap() {
            handles.push(tokio::spawn(async move {
                let rank = endpoint.context().rank;
                let mut buf = if rank == 2 { vec![7.0] } else { vec![0.0] };
                endpoint.broadcast(&mut buf, 2).await.unwrap();
                buf[0]
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), 7.0);
        }
    }

    #[tokio::test]
    async fn test_single_rank_group_is_local_copy() {
        let mut endpoint = local_group(1).unwrap().pop().unwrap();
        let full = [4.0, 5.0];
        let mut chunk = [0.0; 2];
        endpoint.scatter(Some(&full[..]), &mut chunk, 0).await.unwrap();
        assert_eq!(chunk, full);

        let mut gathered = [0.0; 2];
        endpoint.gather(&chunk, Some(&mut gathered[..]), 0).await.unwrap();
        assert_eq!(gathered, full);
        assert_eq!(endpoint.calls_issued(), 2);
    }

    #[tokio::test]
    async fn test_dropped_peer_is_transport_failure() {
        let mut group = local_group(2).unwrap();
        let worker = group.pop().unwrap();
        let mut coordinator = group.pop().unwrap();
        drop(worker);

        let mut buf = vec![1.0];
        let err = coordinator.broadcast(&mut buf, 0).await.unwrap_err();
        assert!(matches!(err, NodeError::Transport(_)));
    }

    #[tokio::test]
    async fn test_scatter_root_buffer_shape_checked() {
        let mut endpoint = local_group(1).unwrap().pop().unwrap();
        let mut chunk = [0.0; 2];
        let err = endpoint
            .scatter(Some(&[1.0, 2.0, 3.0][..]), &mut chunk, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Shape(_)));
    }

    #[tokio::test]
    async fn test_divergent_call_order_detected() {
        let mut group = local_group(2).unwrap();
        let mut worker = group.pop().unwrap();
        let mut coordinator = group.pop().unwrap();

        let worker_task = tokio::spawn(async move {
            // Worker skips the broadcast and goes straight to gather
            let _ = worker.gather(&[1.0], None, 0).await;
            worker
        });

        let mut buf = vec![0.0];
        let err = coordinator.broadcast(&mut buf, 0).await.unwrap_err();
        assert!(err.to_string().contains("Collective mismatch"));
        drop(coordinator);
        let _ = worker_task.await;
    }
}
