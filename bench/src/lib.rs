//! Benchmark orchestration for `mm-node`.
//!
//! A sweep launches one process group per configured process count,
//! records each run as a metrics CSV row (or an all-empty sentinel row when
//! the run fails), logs every run's output, and derives speedup, efficiency
//! and communication overhead against the first successful run.

pub mod config;
pub mod errors;
pub mod launcher;
pub mod record;
pub mod report;
pub mod sweep;

pub use config::SweepConfig;
pub use errors::{BenchError, Result};
pub use launcher::{Launcher, ProcessLauncher, RunOutcome, RunOutput, RunPlan};
pub use record::{read_metrics_csv, RunMetrics, RunRecord, CSV_HEADER};
pub use report::{derive, ScalingRow};
pub use sweep::{run_sweep, SweepResult};
