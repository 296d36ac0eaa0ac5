//! Multi-process collective group over TCP.
//!
//! Rank 0 binds a [`TcpRendezvous`] and waits for every other rank to
//! connect and introduce itself with a [`Handshake::Hello`]. Once the group
//! is complete it answers each worker with [`Handshake::Ready`]. From then
//! on the sockets carry [`CollectiveFrame`]s only.
//!
//! Only root-to-peer links exist, so collectives rooted anywhere other than
//! rank 0 fail with a transport error on this variant.

use super::frame::{read_frame, write_frame, CollectiveFrame, Handshake, DEFAULT_MAX_FRAME_BYTES};
use super::star::{Link, StarCommunicator};
use super::{GroupContext, COORDINATOR_RANK};
use crate::errors::{NodeError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Delay between connection attempts while the coordinator is not up yet
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Rendezvous and framing settings shared by every rank of a run.
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Identity of the run; workers presenting a different id are turned away
    pub run_id: Uuid,
    /// Upper bound on group formation (connect + handshake), not on collectives
    pub connect_timeout: Duration,
    /// Largest encoded frame accepted or produced
    pub max_frame_bytes: usize,
}

impl TcpOptions {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            ..Self::default()
        }
    }
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            run_id: Uuid::nil(),
            connect_timeout: Duration::from_secs(30),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// Socket-backed link; slot `i` holds the stream to rank `i` if one exists.
pub struct TcpLink {
    rank: usize,
    peers: Vec<Option<TcpStream>>,
    max_frame_bytes: usize,
}

/// Collective endpoint for one rank of a TCP group.
pub type TcpTransport = StarCommunicator<TcpLink>;

#[async_trait]
impl Link for TcpLink {
    async fn send(&mut self, peer: usize, frame: &CollectiveFrame) -> Result<()> {
        let max = self.max_frame_bytes;
        let stream = self.stream(peer)?;
        write_frame(stream, frame, max).await
    }

    async fn recv(&mut self, peer: usize) -> Result<CollectiveFrame> {
        let max = self.max_frame_bytes;
        let stream = self.stream(peer)?;
        read_frame(stream, max).await
    }
}

impl TcpLink {
    fn stream(&mut self, peer: usize) -> Result<&mut TcpStream> {
        let rank = self.rank;
        self.peers
            .get_mut(peer)
            .and_then(Option::as_mut)
            .ok_or_else(|| {
                NodeError::Transport(format!("No route from rank {} to rank {}", rank, peer))
            })
    }
}

/// Coordinator-side listener that assembles a TCP group.
pub struct TcpRendezvous {
    listener: TcpListener,
    options: TcpOptions,
}

impl TcpRendezvous {
    /// Bind the coordinator's listening socket.
    pub async fn bind(addr: impl ToSocketAddrs, options: TcpOptions) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| NodeError::Transport(format!("Failed to bind coordinator: {}", e)))?;
        Ok(Self { listener, options })
    }

    /// Address workers should connect to (useful when bound to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Wait until ranks `1..world_size` have joined, then release them all.
    ///
    /// # Errors
    /// Fails with [`NodeError::Transport`] if the group is not complete
    /// within the connect timeout, or a worker reports a different world
    /// size or a rank that is out of range or already taken.
    pub async fn accept_group(self, world_size: usize) -> Result<TcpTransport> {
        let ctx = GroupContext::new(COORDINATOR_RANK, world_size)?;
        let TcpRendezvous { listener, options } = self;

        let mut peers: Vec<Option<TcpStream>> = (0..world_size).map(|_| None).collect();

        let formed = timeout(
            options.connect_timeout,
            accept_workers(&listener, &options, world_size, &mut peers),
        )
        .await;

        match formed {
            Ok(result) => result?,
            Err(_) => {
                let joined = peers.iter().filter(|p| p.is_some()).count();
                return Err(NodeError::Transport(format!(
                    "Only {} of {} workers joined within {:?}",
                    joined,
                    world_size - 1,
                    options.connect_timeout
                )));
            }
        }

        let ready = Handshake::Ready { world_size };
        for stream in peers.iter_mut().flatten() {
            write_frame(stream, &ready, options.max_frame_bytes).await?;
        }

        info!(world_size, run_id = %options.run_id, "Collective group formed");

        Ok(StarCommunicator::new(
            ctx,
            TcpLink {
                rank: COORDINATOR_RANK,
                peers,
                max_frame_bytes: options.max_frame_bytes,
            },
        ))
    }
}

async fn accept_workers(
    listener: &TcpListener,
    options: &TcpOptions,
    world_size: usize,
    peers: &mut [Option<TcpStream>],
) -> Result<()> {
    let mut joined = 0;

    while joined < world_size - 1 {
        let (mut stream, addr) = listener.accept().await?;
        stream.set_nodelay(true)?;

        let hello: Handshake = match read_frame(&mut stream, options.max_frame_bytes).await {
            Ok(hello) => hello,
            Err(e) => {
                warn!(peer = %addr, error = %e, "Dropping connection without a valid hello");
                continue;
            }
        };

        match hello {
            Handshake::Hello {
                rank,
                world_size: theirs,
                run_id,
            } => {
                if run_id != options.run_id {
                    warn!(peer = %addr, %run_id, "Ignoring worker from a different run");
                    continue;
                }
                if theirs != world_size {
                    return Err(NodeError::Transport(format!(
                        "Rank {} expects world size {}, coordinator has {}",
                        rank, theirs, world_size
                    )));
                }
                if rank == COORDINATOR_RANK || rank >= world_size {
                    return Err(NodeError::Transport(format!(
                        "Worker announced invalid rank {} for world size {}",
                        rank, world_size
                    )));
                }
                if peers[rank].is_some() {
                    return Err(NodeError::Transport(format!(
                        "Rank {} joined twice",
                        rank
                    )));
                }

                debug!(rank, peer = %addr, "Worker joined");
                peers[rank] = Some(stream);
                joined += 1;
            }
            Handshake::Ready { .. } => {
                warn!(peer = %addr, "Unexpected ready message from worker");
            }
        }
    }

    Ok(())
}

/// Join a TCP group as a non-coordinator rank.
///
/// Retries the connection until the coordinator is listening, announces
/// this rank, and returns once the coordinator reports the group complete.
pub async fn connect_worker(
    ctx: GroupContext,
    coordinator: &str,
    options: &TcpOptions,
) -> Result<TcpTransport> {
    if ctx.is_coordinator() {
        return Err(NodeError::Config(
            "Rank 0 must accept the group, not connect to it".into(),
        ));
    }

    let deadline = Instant::now() + options.connect_timeout;
    let mut stream = loop {
        match TcpStream::connect(coordinator).await {
            Ok(stream) => break stream,
            Err(e) if Instant::now() + CONNECT_RETRY_DELAY < deadline => {
                debug!(coordinator, error = %e, "Coordinator not reachable yet, retrying");
                sleep(CONNECT_RETRY_DELAY).await;
            }
            Err(e) => {
                return Err(NodeError::Transport(format!(
                    "Could not reach coordinator at {} within {:?}: {}",
                    coordinator, options.connect_timeout, e
                )))
            }
        }
    };
    stream.set_nodelay(true)?;

    let hello = Handshake::Hello {
        rank: ctx.rank,
        world_size: ctx.world_size,
        run_id: options.run_id,
    };
    write_frame(&mut stream, &hello, options.max_frame_bytes).await?;

    let remaining = deadline.saturating_duration_since(Instant::now());
    let reply: Handshake = timeout(remaining, read_frame(&mut stream, options.max_frame_bytes))
        .await
        .map_err(|_| {
            NodeError::Transport(format!(
                "Group did not form within {:?}",
                options.connect_timeout
            ))
        })??;

    match reply {
        Handshake::Ready { world_size } if world_size == ctx.world_size => {}
        other => {
            return Err(NodeError::Transport(format!(
                "Unexpected handshake reply: {:?}",
                other
            )))
        }
    }

    debug!(rank = ctx.rank, coordinator, "Joined collective group");

    let mut peers: Vec<Option<TcpStream>> = (0..ctx.world_size).map(|_| None).collect();
    peers[COORDINATOR_RANK] = Some(stream);

    Ok(StarCommunicator::new(
        ctx,
        TcpLink {
            rank: ctx.rank,
            peers,
            max_frame_bytes: options.max_frame_bytes,
        },
    ))
}
