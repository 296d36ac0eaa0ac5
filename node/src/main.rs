//! mm-node - one rank of a distributed matrix multiplication
//!
//! ## Commands
//! - `run` - Join a TCP process group as one rank (rank 0 coordinates)
//! - `local` - Run a whole group inside this process
//! - `serial` - Time the single-process triple-loop baseline
//! - `generate-config` - Write a default configuration file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use matmul_node::{
    connect_worker, init_production_logging, init_simple_logging, run_local, run_rank,
    GroupContext, MetricsSummary, NodeConfig, NoopListener, RankReport, RunRequest, Stopwatch,
    TcpOptions, TcpRendezvous,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// Distributed row-split matrix multiplication node
#[derive(Parser, Debug)]
#[command(name = "mm-node")]
#[command(about = "Distributed matrix multiplication with per-phase metrics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one rank of a multi-process group over TCP
    Run {
        /// This process's rank (0 is the coordinator)
        #[arg(short, long, env = "MM_RANK")]
        rank: usize,

        /// Total number of ranks in the group
        #[arg(short = 'w', long, env = "MM_WORLD_SIZE")]
        world_size: usize,

        /// Coordinator host:port (rank 0 listens here, others connect)
        #[arg(long, env = "MM_COORDINATOR")]
        coordinator: Option<String>,

        /// Matrix dimension N (overrides config)
        #[arg(short = 'n', long)]
        size: Option<usize>,

        /// Seed for the operands (coordinator only)
        #[arg(long)]
        seed: Option<u64>,

        /// Run identity shared by every rank of the group
        #[arg(long, env = "MM_RUN_ID")]
        run_id: Option<Uuid>,

        /// Write the metrics summary as JSON (coordinator only)
        #[arg(long)]
        summary_out: Option<PathBuf>,

        /// Append one CSV line per run to this history file (coordinator only)
        #[arg(long)]
        history_csv: Option<PathBuf>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Override log level (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Run every rank as a task inside this process
    Local {
        /// Number of ranks
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Matrix dimension N (overrides config)
        #[arg(short = 'n', long)]
        size: Option<usize>,

        /// Seed for the operands
        #[arg(long)]
        seed: Option<u64>,

        /// Check the gathered product against the serial baseline
        #[arg(long)]
        verify: bool,

        /// Write the metrics summary as JSON
        #[arg(long)]
        summary_out: Option<PathBuf>,

        /// Configuration file path
        #[arg(short, long)]
        config: Option<String>,

        /// Override log level (trace, debug, info, warn, error)
        #[arg(short, long)]
        log_level: Option<String>,
    },

    /// Time the single-process triple-loop product
    Serial {
        /// Matrix dimension N
        #[arg(short = 'n', long, default_value = "600")]
        size: usize,

        /// Seed for the operands
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Generate default config and exit
    GenerateConfig {
        /// Where to write the file
        #[arg(short, long, default_value = "~/.matmul/node.toml")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            rank,
            world_size,
            coordinator,
            size,
            seed,
            run_id,
            summary_out,
            history_csv,
            config,
            log_level,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(coordinator) = coordinator {
                config.transport.coordinator_addr = coordinator;
            }
            if let Some(size) = size {
                config.run.matrix_size = size;
            }
            if seed.is_some() {
                config.run.seed = seed;
            }
            config.validate()?;
            setup_logging(&config, log_level.as_deref(), &format!("mm-node-rank{}", rank))?;

            let ctx = GroupContext::new(rank, world_size)?;
            cmd_run(ctx, &config, run_id, summary_out, history_csv).await?;
        }

        Commands::Local {
            workers,
            size,
            seed,
            verify,
            summary_out,
            config,
            log_level,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(size) = size {
                config.run.matrix_size = size;
            }
            if seed.is_some() {
                config.run.seed = seed;
            }
            config.validate()?;
            setup_logging(&config, log_level.as_deref(), "mm-node-local")?;

            cmd_local(workers, &config, verify, summary_out).await?;
        }

        Commands::Serial { size, seed } => {
            init_simple_logging("info")?;
            cmd_serial(size, seed)?;
        }

        Commands::GenerateConfig { path } => {
            let path = shellexpand::tilde(&path);
            let path = Path::new(path.as_ref());

            NodeConfig::default().save(path)?;
            println!("Generated default configuration at: {}", path.display());
            println!("\nStart a rank with:");
            println!(
                "  mm-node run --config {} --rank 0 --world-size 4",
                path.display()
            );
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<NodeConfig> {
    match path {
        Some(path) => {
            let path = shellexpand::tilde(path);
            NodeConfig::load(Path::new(path.as_ref()))
                .with_context(|| format!("Failed to load config from {}", path))
        }
        None => Ok(NodeConfig::default()),
    }
}

fn setup_logging(config: &NodeConfig, level: Option<&str>, file_prefix: &str) -> Result<()> {
    let level = level.unwrap_or(&config.logging.level);
    if config.logging.log_to_file {
        init_production_logging(level, Some(config.log_dir()), file_prefix)
    } else {
        init_simple_logging(level)
    }
}

/// Run one rank over TCP
async fn cmd_run(
    ctx: GroupContext,
    config: &NodeConfig,
    run_id: Option<Uuid>,
    summary_out: Option<PathBuf>,
    history_csv: Option<PathBuf>,
) -> Result<()> {
    let options = TcpOptions {
        connect_timeout: Duration::from_secs(config.transport.connect_timeout_secs),
        max_frame_bytes: config.max_frame_bytes(),
        ..TcpOptions::new(run_id.unwrap_or_else(Uuid::nil))
    };
    let coordinator = &config.transport.coordinator_addr;
    let request = RunRequest::random(config.run.matrix_size, config.run.seed);

    info!(
        rank = ctx.rank,
        world_size = ctx.world_size,
        matrix_size = config.run.matrix_size,
        run_id = %options.run_id,
        "Starting rank"
    );

    let report = if ctx.is_coordinator() {
        let rendezvous = TcpRendezvous::bind(coordinator.as_str(), options)
            .await
            .with_context(|| format!("Failed to listen on {}", coordinator))?;
        info!(addr = %rendezvous.local_addr()?, "Waiting for workers");

        let mut transport = rendezvous.accept_group(ctx.world_size).await?;
        run_rank(&mut transport, &request, &NoopListener).await?
    } else {
        let mut transport = connect_worker(ctx, coordinator, &options).await?;
        run_rank(&mut transport, &request, &NoopListener).await?
    };

    match report {
        RankReport::Coordinator { summary, .. } => {
            print!("\n{}", summary.render());
            publish_summary(&summary, summary_out.as_deref(), history_csv.as_deref())?;
        }
        RankReport::Worker { timing } => {
            debug!(?timing, "Rank finished");
        }
    }

    Ok(())
}

/// Run every rank in-process
async fn cmd_local(
    workers: usize,
    config: &NodeConfig,
    verify: bool,
    summary_out: Option<PathBuf>,
) -> Result<()> {
    let n = config.run.matrix_size;
    // Verification needs to regenerate the same operands
    let seed = match (config.run.seed, verify) {
        (Some(seed), _) => Some(seed),
        (None, true) => Some(rand::random()),
        (None, false) => None,
    };
    let request = Arc::new(RunRequest::random(n, seed));

    info!(workers, matrix_size = n, "Starting in-process group");
    let report = run_local(workers, Arc::clone(&request), Arc::new(NoopListener)).await?;

    let RankReport::Coordinator { result, summary, .. } = report else {
        bail!("Rank 0 did not produce a coordinator report");
    };

    summary.display();
    publish_summary(&summary, summary_out.as_deref(), None)?;

    if verify {
        let operands = request.materialize()?;
        let expected = operands.a.matmul_serial(&operands.b)?;
        let error = result.max_relative_error(&expected)?;

        if error < 1e-9 {
            println!(
                "{} max relative error {:.3e}",
                "Verified:".green().bold(),
                error
            );
        } else {
            bail!("Distributed product differs from serial baseline (max relative error {:.3e})", error);
        }
    }

    Ok(())
}

/// Serial baseline
fn cmd_serial(size: usize, seed: Option<u64>) -> Result<()> {
    let operands = RunRequest::random(size, seed).materialize()?;

    let watch = Stopwatch::start();
    let product = operands.a.matmul_serial(&operands.b)?;
    let elapsed = watch.elapsed();

    debug!(rows = product.rows(), cols = product.cols(), "Serial product computed");
    println!(
        "Matrix multiplication completed in {:.4} seconds",
        elapsed.as_secs_f64()
    );
    Ok(())
}

fn publish_summary(
    summary: &MetricsSummary,
    summary_out: Option<&Path>,
    history_csv: Option<&Path>,
) -> Result<()> {
    summary.print_summary();

    if let Some(path) = summary_out {
        summary
            .save(path)
            .with_context(|| format!("Failed to write summary to {}", path.display()))?;
    }
    if let Some(path) = history_csv {
        summary
            .append_history(path)
            .with_context(|| format!("Failed to append history to {}", path.display()))?;
    }
    Ok(())
}
