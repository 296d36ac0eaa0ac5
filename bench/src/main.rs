//! mm-bench - benchmark sweep for mm-node
//!
//! ## Commands
//! - `sweep` - Run one process group per process count and record metrics
//! - `report` - Recompute scaling figures from an existing metrics CSV
//! - `generate-config` - Write a default sweep configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use matmul_bench::{read_metrics_csv, report, run_sweep, ProcessLauncher, SweepConfig};
use matmul_node::init_simple_logging;
use std::path::{Path, PathBuf};
use tracing::info;

/// Benchmark sweep for the distributed matrix multiplication node
#[derive(Parser, Debug)]
#[command(name = "mm-bench")]
#[command(about = "Sweep process counts and report scaling of mm-node", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the benchmark sweep
    Sweep {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Matrix dimension N (overrides config)
        #[arg(short = 'n', long)]
        size: Option<usize>,

        /// Process counts, comma separated (overrides config)
        #[arg(short, long, value_delimiter = ',')]
        workers: Option<Vec<usize>>,

        /// Seed for the operands (overrides config)
        #[arg(long)]
        seed: Option<u64>,

        /// Per-run timeout in seconds (overrides config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Path to the mm-node binary (overrides config)
        #[arg(long)]
        node_binary: Option<String>,

        /// Metrics CSV path (overrides config)
        #[arg(long)]
        metrics_csv: Option<String>,

        /// Run log path (overrides config)
        #[arg(long)]
        log_file: Option<String>,

        /// Report CSV path (overrides config)
        #[arg(long)]
        report_csv: Option<String>,

        /// Override log level (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Derive speedup, efficiency and communication overhead from a metrics CSV
    Report {
        /// Metrics CSV written by a previous sweep
        #[arg(short, long, default_value = "benchmark_metrics.csv")]
        metrics: PathBuf,

        /// Also write the derived table here
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Generate default config and exit
    GenerateConfig {
        /// Where to write the file
        #[arg(short, long, default_value = "mm-bench.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep {
            config,
            size,
            workers,
            seed,
            timeout,
            node_binary,
            metrics_csv,
            log_file,
            report_csv,
            log_level,
        } => {
            let mut config = match config {
                Some(path) => {
                    let path = shellexpand::tilde(&path);
                    SweepConfig::load(Path::new(path.as_ref()))
                        .with_context(|| format!("Failed to load config from {}", path))?
                }
                None => SweepConfig::default(),
            };

            if let Some(size) = size {
                config.sweep.matrix_size = size;
            }
            if let Some(workers) = workers {
                config.sweep.worker_counts = workers;
            }
            if seed.is_some() {
                config.sweep.seed = seed;
            }
            if let Some(timeout) = timeout {
                config.sweep.run_timeout_secs = timeout;
            }
            if node_binary.is_some() {
                config.sweep.node_binary = node_binary;
            }
            if let Some(path) = metrics_csv {
                config.output.metrics_csv = path;
            }
            if let Some(path) = log_file {
                config.output.log_file = path;
            }
            if let Some(path) = report_csv {
                config.output.report_csv = path;
            }
            if let Some(level) = log_level {
                config.logging.level = level;
            }
            config.validate()?;

            init_simple_logging(&config.logging.level)?;
            cmd_sweep(&config).await?;
        }

        Commands::Report { metrics, out } => {
            init_simple_logging("warn")?;
            cmd_report(&metrics, out.as_deref())?;
        }

        Commands::GenerateConfig { path } => {
            let path = shellexpand::tilde(&path);
            let path = Path::new(path.as_ref());

            SweepConfig::default().save(path)?;
            println!("Generated default configuration at: {}", path.display());
            println!("\nEdit the configuration file and then start a sweep with:");
            println!("  mm-bench sweep --config {}", path.display());
        }
    }

    Ok(())
}

/// Run the sweep with real node processes
async fn cmd_sweep(config: &SweepConfig) -> Result<()> {
    let launcher = ProcessLauncher::from_config(config)?;
    info!(node_binary = %launcher.node_binary().display(), "Using node binary");

    let result = run_sweep(config, &launcher).await?;
    report::display(&result.report);

    if result.failed_runs() > 0 {
        println!(
            "{} of {} runs failed; see {}",
            result.failed_runs(),
            result.records.len(),
            config.output.log_file().display()
        );
    }
    Ok(())
}

/// Recompute the report from a metrics CSV
fn cmd_report(metrics: &Path, out: Option<&Path>) -> Result<()> {
    let records = read_metrics_csv(metrics)
        .with_context(|| format!("Failed to read {}", metrics.display()))?;
    let rows = report::derive(&records);

    report::display(&rows);

    if let Some(out) = out {
        report::write_report_csv(out, &rows)?;
        println!("Report written to: {}", out.display());
    }
    Ok(())
}
