//! Running every configured process count in turn.

use crate::config::SweepConfig;
use crate::errors::Result;
use crate::launcher::{Launcher, RunOutcome, RunPlan};
use crate::record::{MetricsWriter, RunLog, RunRecord};
use crate::report::{self, ScalingRow};
use colored::Colorize;
use tracing::{error, info};

/// Everything a sweep produced.
#[derive(Debug, Clone)]
pub struct SweepResult {
    /// One record per configured process count, in sweep order
    pub records: Vec<RunRecord>,
    pub report: Vec<ScalingRow>,
}

impl SweepResult {
    pub fn failed_runs(&self) -> usize {
        self.records.iter().filter(|r| r.is_sentinel()).count()
    }
}

/// Run the sweep described by `config` and write all of its outputs.
///
/// Each run's CSV row and log entry are written as soon as it finishes, so
/// a sweep interrupted halfway still leaves the completed rows behind. A
/// failed run becomes a sentinel row and does not stop the sweep.
pub async fn run_sweep(config: &SweepConfig, launcher: &dyn Launcher) -> Result<SweepResult> {
    let metrics_path = config.output.metrics_csv();
    let mut metrics = MetricsWriter::create(&metrics_path)?;
    let mut log = RunLog::create(&config.output.log_file())?;

    info!(
        matrix_size = config.sweep.matrix_size,
        worker_counts = ?config.sweep.worker_counts,
        "Starting benchmark sweep"
    );

    let mut records = Vec::with_capacity(config.sweep.worker_counts.len());
    for &worker_count in &config.sweep.worker_counts {
        println!("\nRunning with {} processes...", worker_count);

        let plan = RunPlan::new(config, worker_count)?;
        let output = launcher.launch(&plan).await?;
        log.append(&output)?;

        match &output.outcome {
            RunOutcome::Completed(summary) => {
                println!(
                    "{} Time: {:.4}s",
                    "Success.".green().bold(),
                    summary.total_time_s
                );
            }
            RunOutcome::Failed(reason) => {
                error!(processes = worker_count, reason = %reason, "Run failed");
                println!(
                    "{} with {} processes: {}",
                    "Error".red().bold(),
                    worker_count,
                    reason
                );
            }
        }

        let record = RunRecord::from_output(&output);
        metrics.append(&record)?;
        records.push(record);
    }

    let report = report::derive(&records);
    report::write_report_csv(&config.output.report_csv(), &report)?;

    println!(
        "\nBenchmark complete. Results saved to: {}",
        metrics_path.display()
    );

    Ok(SweepResult { records, report })
}
