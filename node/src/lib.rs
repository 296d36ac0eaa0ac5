//! Row-split distributed matrix multiplication with per-phase metrics.
//!
//! The coordinator (rank 0) owns both operands, broadcasts B, scatters A by
//! rows, and gathers the product and every rank's phase timings back. See
//! [`engine`] for the per-rank lifecycle and [`transport`] for the
//! collective layer it runs on.

pub mod config;
pub mod engine;
pub mod errors;
pub mod matrix;
pub mod metrics;
pub mod observability;
pub mod partition;
pub mod sampler;
pub mod transport;

pub use config::NodeConfig;
pub use engine::{
    run_local, run_rank, NoopListener, OperandSource, Operands, Phase, PhaseListener, RankReport,
    RunRequest,
};
pub use errors::{NodeError, Result};
pub use matrix::{Matrix, RowBlock};
pub use metrics::{aggregate, MetricsSummary, PhaseTiming};
pub use observability::{init_production_logging, init_simple_logging};
pub use partition::{plan, PartitionPlan};
pub use sampler::{MemorySampler, Stopwatch};
pub use transport::{
    connect_worker, local_group, CollectiveTransport, GroupContext, LocalTransport, TcpOptions,
    TcpRendezvous, TcpTransport, COORDINATOR_RANK,
};
