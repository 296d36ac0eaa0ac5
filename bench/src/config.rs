use crate::errors::{BenchError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for a benchmark sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    pub sweep: SweepSettings,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// What to run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepSettings {
    pub matrix_size: usize,
    /// One run per entry, in this order
    pub worker_counts: Vec<usize>,
    pub seed: Option<u64>,
    /// Wall-clock limit per run; the whole process group is killed past it
    pub run_timeout_secs: u64,
    /// Defaults to `mm-node` next to the running executable
    pub node_binary: Option<String>,
    /// Interface the coordinator rank listens on
    pub coordinator_host: String,
}

/// Where results go
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub metrics_csv: String,
    pub log_file: String,
    pub report_csv: String,
    /// Per-run JSON summaries written by the coordinator rank
    pub summary_dir: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl SweepConfig {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: SweepConfig = toml::from_str(&content)?;

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Generate default configuration
    pub fn default() -> Self {
        SweepConfig {
            sweep: SweepSettings {
                matrix_size: 6000,
                worker_counts: vec![2, 3, 4],
                seed: None,
                run_timeout_secs: 600,
                node_binary: None,
                coordinator_host: "127.0.0.1".to_string(),
            },
            output: OutputConfig {
                metrics_csv: "benchmark_metrics.csv".to_string(),
                log_file: "benchmark_log.txt".to_string(),
                report_csv: "benchmark_report.csv".to_string(),
                summary_dir: "benchmark_runs".to_string(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sweep.matrix_size == 0 {
            return Err(BenchError::Config("matrix_size must be at least 1".into()));
        }

        if self.sweep.worker_counts.is_empty() {
            return Err(BenchError::Config(
                "worker_counts must list at least one process count".into(),
            ));
        }

        if self.sweep.worker_counts.contains(&0) {
            return Err(BenchError::Config(
                "worker_counts entries must be at least 1".into(),
            ));
        }

        if self.sweep.run_timeout_secs == 0 {
            return Err(BenchError::Config(
                "run_timeout_secs must be at least 1".into(),
            ));
        }

        if self.sweep.coordinator_host.is_empty() {
            return Err(BenchError::Config("coordinator_host must not be empty".into()));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(BenchError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;

        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string)?;
        std::fs::rename(&temp_path, path)?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }
}

impl OutputConfig {
    pub fn metrics_csv(&self) -> PathBuf {
        expand(&self.metrics_csv)
    }

    pub fn log_file(&self) -> PathBuf {
        expand(&self.log_file)
    }

    pub fn report_csv(&self) -> PathBuf {
        expand(&self.report_csv)
    }

    pub fn summary_dir(&self) -> PathBuf {
        expand(&self.summary_dir)
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
