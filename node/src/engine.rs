//! Distributed multiply engine: the per-rank lifecycle of one run.
//!
//! Every rank runs [`run_rank`] against its own transport endpoint and walks
//! the same sequence of phases in lock-step:
//!
//! 1. **Init**: the coordinator materializes both operands; every other rank
//!    allocates an empty buffer for B only.
//! 2. **BroadcastB**: B is replicated to every rank.
//! 3. **PartitionCheck**: each rank evaluates [`partition::plan`] on its own.
//!    On failure every rank returns before entering another collective.
//! 4. **ScatterA**: A is split row-wise, one [`RowBlock`] per rank.
//! 5. **Compute**: each rank multiplies its block by B.
//! 6. **GatherC**: result blocks are reassembled at the coordinator in rank order.
//! 7. **Report**: each rank's [`PhaseTiming`] is gathered and reduced into a
//!    [`MetricsSummary`] at the coordinator.

use crate::errors::{NodeError, Result};
use crate::matrix::{Matrix, RowBlock};
use crate::metrics::{aggregate, MetricsSummary, PhaseTiming, TIMING_WIRE_LEN};
use crate::partition;
use crate::sampler::{time, time_async, MemorySampler, Stopwatch};
use crate::transport::{local_group, CollectiveTransport, GroupContext, COORDINATOR_RANK};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};

/// Lifecycle phases, in the order every rank enters them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    BroadcastB,
    PartitionCheck,
    ScatterA,
    Compute,
    GatherC,
    Report,
}

/// Observer notified as a rank enters each [`Phase`].
pub trait PhaseListener: Send + Sync {
    fn on_phase(&self, ctx: GroupContext, phase: Phase);
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl PhaseListener for NoopListener {
    fn on_phase(&self, _ctx: GroupContext, _phase: Phase) {}
}

/// The two input operands of `C = A * B`.
#[derive(Debug, Clone, PartialEq)]
pub struct Operands {
    pub a: Matrix,
    pub b: Matrix,
}

/// Where the coordinator gets its operands from.
#[derive(Debug, Clone, PartialEq)]
pub enum OperandSource {
    /// Uniform `[0, 1)` entries; a seed makes the run reproducible
    Random { seed: Option<u64> },
    /// Caller-supplied matrices, must be `matrix_size x matrix_size`
    Fixed(Operands),
}

/// Parameters every rank of a run agrees on.
#[derive(Debug, Clone, PartialEq)]
pub struct RunRequest {
    pub matrix_size: usize,
    /// Only read on the coordinator
    pub operands: OperandSource,
}

impl RunRequest {
    pub fn random(matrix_size: usize, seed: Option<u64>) -> Self {
        Self {
            matrix_size,
            operands: OperandSource::Random { seed },
        }
    }

    pub fn fixed(a: Matrix, b: Matrix) -> Self {
        Self {
            matrix_size: a.rows(),
            operands: OperandSource::Fixed(Operands { a, b }),
        }
    }

    /// Build the coordinator's operands.
    pub fn materialize(&self) -> Result<Operands> {
        let n = self.matrix_size;
        match &self.operands {
            OperandSource::Random { seed } => {
                let mut rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(*seed),
                    None => StdRng::from_entropy(),
                };
                let a = Matrix::random(n, n, &mut rng)?;
                let b = Matrix::random(n, n, &mut rng)?;
                Ok(Operands { a, b })
            }
            OperandSource::Fixed(operands) => {
                for (name, m) in [("A", &operands.a), ("B", &operands.b)] {
                    if m.rows() != n || m.cols() != n {
                        return Err(NodeError::Shape(format!(
                            "Operand {} is {}x{}, expected {}x{}",
                            name,
                            m.rows(),
                            m.cols(),
                            n,
                            n
                        )));
                    }
                }
                Ok(operands.clone())
            }
        }
    }
}

/// What one rank takes away from a completed run.
#[derive(Debug, Clone)]
pub enum RankReport {
    Coordinator {
        /// Full product, rows in rank order
        result: Matrix,
        summary: MetricsSummary,
        /// Every rank's timing, indexed by rank
        timings: Vec<PhaseTiming>,
    },
    Worker {
        timing: PhaseTiming,
    },
}

impl RankReport {
    pub fn summary(&self) -> Option<&MetricsSummary> {
        match self {
            RankReport::Coordinator { summary, .. } => Some(summary),
            RankReport::Worker { .. } => None,
        }
    }

    pub fn result(&self) -> Option<&Matrix> {
        match self {
            RankReport::Coordinator { result, .. } => Some(result),
            RankReport::Worker { .. } => None,
        }
    }
}

/// Run one rank of a distributed multiply to completion.
///
/// All ranks of the group must call this with the same `matrix_size`.
///
/// # Errors
/// - [`NodeError::InvalidPartition`] on every rank when `matrix_size` is not
///   divisible by the group size. No rank enters the scatter in that case.
/// - [`NodeError::Transport`] if any collective fails.
/// - [`NodeError::Allocation`] if a buffer cannot be reserved.
pub async fn run_rank<T>(
    transport: &mut T,
    request: &RunRequest,
    listener: &dyn PhaseListener,
) -> Result<RankReport>
where
    T: CollectiveTransport + ?Sized,
{
    let ctx = transport.context();
    let span = info_span!("rank", rank = ctx.rank, world_size = ctx.world_size);
    drive(transport, request, listener).instrument(span).await
}

async fn drive<T>(
    transport: &mut T,
    request: &RunRequest,
    listener: &dyn PhaseListener,
) -> Result<RankReport>
where
    T: CollectiveTransport + ?Sized,
{
    let ctx = transport.context();
    let n = request.matrix_size;

    listener.on_phase(ctx, Phase::Init);
    let (a, mut b) = if ctx.is_coordinator() {
        let Operands { a, b } = request.materialize()?;
        (Some(a), b)
    } else {
        (None, Matrix::zeros(n, n)?)
    };

    // Total time starts after operand setup
    let total_watch = Stopwatch::start();

    listener.on_phase(ctx, Phase::BroadcastB);
    let (outcome, broadcast) =
        time_async(transport.broadcast(b.as_mut_slice(), COORDINATOR_RANK)).await;
    outcome?;
    debug!(elapsed = ?broadcast, "B broadcast complete");

    listener.on_phase(ctx, Phase::PartitionCheck);
    let plan = match partition::plan(n, ctx.world_size) {
        Ok(plan) => plan,
        Err(e) => {
            if ctx.is_coordinator() {
                warn!(
                    matrix_size = n,
                    processes = ctx.world_size,
                    "Matrix size not divisible by number of processes"
                );
            }
            return Err(e);
        }
    };

    listener.on_phase(ctx, Phase::ScatterA);
    let mut a_rows = Matrix::zeros(plan.rows_per_worker, n)?;
    let (outcome, scatter) = time_async(transport.scatter(
        a.as_ref().map(Matrix::as_slice),
        a_rows.as_mut_slice(),
        COORDINATOR_RANK,
    ))
    .await;
    outcome?;
    let block = RowBlock::new(ctx.rank, plan.row_range(ctx.rank).start, a_rows);
    debug!(rows = ?block.row_range(), elapsed = ?scatter, "A row-block received");

    listener.on_phase(ctx, Phase::Compute);
    let (product, compute) = time(|| block.multiply(&b));
    let product = product?;
    debug!(elapsed = ?compute, "Local product computed");

    listener.on_phase(ctx, Phase::GatherC);
    let mut result = if ctx.is_coordinator() {
        Some(Matrix::zeros(n, n)?)
    } else {
        None
    };
    let (outcome, gather) = time_async(transport.gather(
        product.data.as_slice(),
        result.as_mut().map(Matrix::as_mut_slice),
        COORDINATOR_RANK,
    ))
    .await;
    outcome?;
    let total = total_watch.elapsed();

    if ctx.is_coordinator() {
        info!(
            "Distributed matrix multiplication completed in {:.4} seconds",
            total.as_secs_f64()
        );
    }

    listener.on_phase(ctx, Phase::Report);
    let timing = PhaseTiming {
        compute,
        broadcast,
        scatter,
        gather,
        memory_mb: sample_memory_mb(),
    };

    let mut gathered = if ctx.is_coordinator() {
        Some(vec![0.0; ctx.world_size * TIMING_WIRE_LEN])
    } else {
        None
    };
    transport
        .gather(&timing.to_wire(), gathered.as_deref_mut(), COORDINATOR_RANK)
        .await?;

    match (result, gathered) {
        (Some(result), Some(gathered)) => {
            let timings = PhaseTiming::decode_all(&gathered)?;
            let summary = aggregate(&timings, n, total)?;
            Ok(RankReport::Coordinator {
                result,
                summary,
                timings,
            })
        }
        _ => Ok(RankReport::Worker { timing }),
    }
}

/// Resident memory of this process; 0 if the OS will not tell us.
fn sample_memory_mb() -> f64 {
    match MemorySampler::new().and_then(|mut sampler| sampler.resident_mb()) {
        Ok(mb) => mb,
        Err(e) => {
            warn!(error = %e, "Memory sample unavailable, reporting 0 MB");
            0.0
        }
    }
}

/// Run a whole group inside this process, one task per rank.
///
/// Returns the coordinator's report. If any rank fails, the coordinator's
/// error is preferred since it is the one that describes the run.
pub async fn run_local(
    world_size: usize,
    request: Arc<RunRequest>,
    listener: Arc<dyn PhaseListener>,
) -> Result<RankReport> {
    let handles: Vec<_> = local_group(world_size)?
        .into_iter()
        .map(|mut endpoint| {
            let request = Arc::clone(&request);
            let listener = Arc::clone(&listener);
            tokio::spawn(async move { run_rank(&mut endpoint, &request, listener.as_ref()).await })
        })
        .collect();

    let mut reports = futures::future::join_all(handles).await.into_iter();

    let coordinator = reports
        .next()
        .ok_or_else(|| NodeError::Config("Empty group".into()))?
        .map_err(|e| NodeError::Transport(format!("Coordinator task failed: {}", e)))??;

    for (offset, report) in reports.enumerate() {
        let rank = offset + 1;
        match report {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => return Err(e),
            Err(e) => {
                return Err(NodeError::Transport(format!(
                    "Rank {} task failed: {}",
                    rank, e
                )))
            }
        }
    }

    Ok(coordinator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_operands_reproducible() {
        let request = RunRequest::random(5, Some(11));
        assert_eq!(request.materialize().unwrap(), request.materialize().unwrap());

        let other = RunRequest::random(5, Some(12));
        assert_ne!(request.materialize().unwrap(), other.materialize().unwrap());
    }

    #[test]
    fn test_fixed_operands_shape_checked() {
        let request = RunRequest {
            matrix_size: 3,
            operands: OperandSource::Fixed(Operands {
                a: Matrix::identity(3).unwrap(),
                b: Matrix::identity(2).unwrap(),
            }),
        };
        assert!(matches!(request.materialize(), Err(NodeError::Shape(_))));
    }

    #[tokio::test]
    async fn test_single_rank_run() {
        let a = Matrix::from_rows(&[vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        let b = Matrix::identity(2).unwrap();
        let request = RunRequest::fixed(a.clone(), b);

        let mut endpoint = local_group(1).unwrap().pop().unwrap();
        let report = run_rank(&mut endpoint, &request, &NoopListener)
            .await
            .unwrap();

        assert_eq!(report.result(), Some(&a));
        let summary = report.summary().unwrap();
        assert_eq!(summary.worker_count, 1);
        assert_eq!(summary.matrix_size, 2);
    }

    #[tokio::test]
    async fn test_run_local_reports_coordinator() {
        let report = run_local(
            2,
            Arc::new(RunRequest::random(4, Some(3))),
            Arc::new(NoopListener),
        )
        .await
        .unwrap();

        match report {
            RankReport::Coordinator { timings, .. } => assert_eq!(timings.len(), 2),
            RankReport::Worker { .. } => panic!("expected coordinator report"),
        }
    }

    #[tokio::test]
    async fn test_run_local_invalid_partition() {
        let err = run_local(
            3,
            Arc::new(RunRequest::random(4, Some(3))),
            Arc::new(NoopListener),
        )
        .await
        .unwrap_err();
        assert!(err.is_invalid_partition());
    }
}
