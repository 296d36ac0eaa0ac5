//! Starting one `mm-node` process group per benchmark configuration.

use crate::config::SweepConfig;
use crate::errors::{BenchError, Result};
use async_trait::async_trait;
use matmul_node::MetricsSummary;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Everything needed to start one process group.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub worker_count: usize,
    pub matrix_size: usize,
    pub seed: Option<u64>,
    pub run_id: Uuid,
    /// host:port the coordinator rank listens on
    pub coordinator: String,
    /// Where the coordinator writes its JSON summary
    pub summary_path: PathBuf,
    pub timeout: Duration,
}

impl RunPlan {
    /// Plan a run of `worker_count` ranks on a fresh port.
    pub fn new(config: &SweepConfig, worker_count: usize) -> Result<Self> {
        let host = &config.sweep.coordinator_host;
        let port = free_port(host)?;
        let run_id = Uuid::new_v4();

        Ok(Self {
            worker_count,
            matrix_size: config.sweep.matrix_size,
            seed: config.sweep.seed,
            run_id,
            coordinator: format!("{}:{}", host, port),
            summary_path: config
                .output
                .summary_dir()
                .join(format!("p{}-{}.json", worker_count, run_id)),
            timeout: Duration::from_secs(config.sweep.run_timeout_secs),
        })
    }

    /// Command-line arguments for `rank`.
    pub fn args_for(&self, rank: usize) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rank".to_string(),
            rank.to_string(),
            "--world-size".to_string(),
            self.worker_count.to_string(),
            "--coordinator".to_string(),
            self.coordinator.clone(),
            "--size".to_string(),
            self.matrix_size.to_string(),
            "--run-id".to_string(),
            self.run_id.to_string(),
        ];
        if let Some(seed) = self.seed {
            args.push("--seed".to_string());
            args.push(seed.to_string());
        }
        if rank == 0 {
            args.push("--summary-out".to_string());
            args.push(self.summary_path.display().to_string());
        }
        args
    }
}

/// How a run ended.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(MetricsSummary),
    /// The run produced no metrics; the reason is for the log
    Failed(String),
}

/// Captured output of one process group.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub worker_count: usize,
    /// Every rank's stdout, in rank order
    pub stdout: String,
    /// Every rank's stderr, in rank order, each under a rank marker
    pub stderr: String,
    pub outcome: RunOutcome,
}

/// Something that can execute a [`RunPlan`].
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Run the group to completion.
    ///
    /// Only failures to start the group at all are errors; anything that
    /// goes wrong once it is running is reported as [`RunOutcome::Failed`].
    async fn launch(&self, plan: &RunPlan) -> Result<RunOutput>;
}

/// Launches real `mm-node` child processes on this machine.
pub struct ProcessLauncher {
    node_binary: PathBuf,
}

impl ProcessLauncher {
    pub fn new(node_binary: PathBuf) -> Self {
        Self { node_binary }
    }

    /// Use the configured binary, or `mm-node` next to the current executable.
    pub fn from_config(config: &SweepConfig) -> Result<Self> {
        let node_binary = match &config.sweep.node_binary {
            Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => {
                let exe = std::env::current_exe()?;
                let dir = exe.parent().ok_or_else(|| {
                    BenchError::Launch("Cannot locate directory of current executable".into())
                })?;
                dir.join(format!("mm-node{}", std::env::consts::EXE_SUFFIX))
            }
        };

        if !node_binary.exists() {
            return Err(BenchError::Launch(format!(
                "Node binary not found at {}",
                node_binary.display()
            )));
        }

        Ok(Self::new(node_binary))
    }

    pub fn node_binary(&self) -> &Path {
        &self.node_binary
    }
}

#[async_trait]
impl Launcher for ProcessLauncher {
    async fn launch(&self, plan: &RunPlan) -> Result<RunOutput> {
        if let Some(dir) = plan.summary_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut children = Vec::with_capacity(plan.worker_count);
        for rank in 0..plan.worker_count {
            let child = Command::new(&self.node_binary)
                .args(plan.args_for(rank))
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|e| {
                    BenchError::Launch(format!(
                        "Failed to start rank {} ({}): {}",
                        rank,
                        self.node_binary.display(),
                        e
                    ))
                })?;
            children.push(child);
        }

        info!(
            processes = plan.worker_count,
            coordinator = %plan.coordinator,
            run_id = %plan.run_id,
            "Process group started"
        );

        let waits = futures::future::join_all(
            children.into_iter().map(|child| child.wait_with_output()),
        );

        let outputs = match tokio::time::timeout(plan.timeout, waits).await {
            Ok(outputs) => outputs,
            Err(_) => {
                // Dropping the wait futures drops the children, which kills them
                warn!(processes = plan.worker_count, timeout = ?plan.timeout, "Run timed out");
                return Ok(RunOutput {
                    worker_count: plan.worker_count,
                    stdout: String::new(),
                    stderr: String::new(),
                    outcome: RunOutcome::Failed(format!(
                        "Timed out after {}s",
                        plan.timeout.as_secs()
                    )),
                });
            }
        };

        let mut collected = Vec::with_capacity(outputs.len());
        for (rank, output) in outputs.into_iter().enumerate() {
            let output = output.map_err(|e| {
                BenchError::Launch(format!("Failed to wait for rank {}: {}", rank, e))
            })?;
            collected.push(output);
        }

        Ok(summarize(plan, &collected))
    }
}

/// Turn the ranks' exit statuses and the coordinator's summary into a result.
fn summarize(plan: &RunPlan, outputs: &[Output]) -> RunOutput {
    let stdout = outputs
        .iter()
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .collect::<String>();
    let stderr = collect_stderr(outputs);

    let failed: Vec<String> = outputs
        .iter()
        .enumerate()
        .filter(|(_, o)| !o.status.success())
        .map(|(rank, o)| format!("rank {} exited with {}", rank, o.status))
        .collect();

    let outcome = if !failed.is_empty() {
        RunOutcome::Failed(failed.join(", "))
    } else {
        match load_summary(&plan.summary_path) {
            Ok(summary) => RunOutcome::Completed(summary),
            Err(e) => RunOutcome::Failed(format!(
                "No usable summary at {}: {}",
                plan.summary_path.display(),
                e
            )),
        }
    };

    debug!(processes = plan.worker_count, ?outcome, "Run finished");

    RunOutput {
        worker_count: plan.worker_count,
        stdout,
        stderr,
        outcome,
    }
}

fn load_summary(path: &Path) -> Result<MetricsSummary> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn collect_stderr(outputs: &[Output]) -> String {
    let mut stderr = String::new();
    for (rank, output) in outputs.iter().enumerate() {
        let text = String::from_utf8_lossy(&output.stderr);
        if text.trim().is_empty() {
            continue;
        }
        stderr.push_str(&format!("--- rank {} ---\n", rank));
        stderr.push_str(&text);
        if !text.ends_with('\n') {
            stderr.push('\n');
        }
    }
    stderr
}

/// Ask the OS for a currently unused TCP port on `host`.
///
/// The port is released before returning, so another process could in
/// principle take it before the coordinator binds it.
pub fn free_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))
        .map_err(|e| BenchError::Launch(format!("Cannot bind {}: {}", host, e)))?;
    Ok(listener.local_addr()?.port())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(worker_count: usize, seed: Option<u64>) -> RunPlan {
        RunPlan {
            worker_count,
            matrix_size: 12,
            seed,
            run_id: Uuid::nil(),
            coordinator: "127.0.0.1:9000".to_string(),
            summary_path: PathBuf::from("runs/p2.json"),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_free_port_is_nonzero() {
        assert_ne!(free_port("127.0.0.1").unwrap(), 0);
    }

    #[test]
    fn test_coordinator_args_include_summary() {
        let args = plan(2, Some(7)).args_for(0);
        assert_eq!(&args[..3], ["run", "--rank", "0"]);
        assert!(args.windows(2).any(|w| w == ["--world-size", "2"]));
        assert!(args.windows(2).any(|w| w == ["--seed", "7"]));
        assert!(args.windows(2).any(|w| w == ["--summary-out", "runs/p2.json"]));
    }

    #[test]
    fn test_worker_args_skip_summary() {
        let args = plan(3, None).args_for(2);
        assert!(args.windows(2).any(|w| w == ["--rank", "2"]));
        assert!(!args.iter().any(|a| a == "--summary-out"));
        assert!(!args.iter().any(|a| a == "--seed"));
    }

    #[test]
    fn test_plan_from_config() {
        let config = SweepConfig::default();
        let plan = RunPlan::new(&config, 3).unwrap();

        assert_eq!(plan.worker_count, 3);
        assert_eq!(plan.matrix_size, 6000);
        assert!(plan.coordinator.starts_with("127.0.0.1:"));
        assert!(plan
            .summary_path
            .to_string_lossy()
            .contains(&plan.run_id.to_string()));
    }

    #[test]
    fn test_missing_binary_is_launch_error() {
        let mut config = SweepConfig::default();
        config.sweep.node_binary = Some("/definitely/not/here/mm-node".to_string());

        let err = ProcessLauncher::from_config(&config).err().unwrap();
        assert!(matches!(err, BenchError::Launch(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_summarize_reports_failed_ranks() {
        use std::os::unix::process::ExitStatusExt;

        let ok = Output {
            status: std::process::ExitStatus::from_raw(0),
            stdout: b"=== Performance Metrics Summary ===\n".to_vec(),
            stderr: Vec::new(),
        };
        let bad = Output {
            status: std::process::ExitStatus::from_raw(1 << 8),
            stdout: Vec::new(),
            stderr: b"Invalid partition".to_vec(),
        };

        let output = summarize(&plan(2, None), &[ok, bad]);
        match output.outcome {
            RunOutcome::Failed(reason) => assert!(reason.contains("rank 1")),
            RunOutcome::Completed(_) => panic!("expected failure"),
        }
        assert!(output.stderr.starts_with("--- rank 1 ---\nInvalid partition"));
        assert!(output.stdout.contains("Performance Metrics Summary"));
    }
}
