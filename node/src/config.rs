use crate::errors::{NodeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for one `mm-node` process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub run: RunConfig,
    pub transport: TransportConfig,
    pub logging: LoggingConfig,
}

/// What to multiply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub matrix_size: usize,
    /// Omit for fresh operands on every run
    pub seed: Option<u64>,
}

/// Group formation settings for the TCP transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// host:port rank 0 listens on and every other rank connects to
    pub coordinator_addr: String,
    pub connect_timeout_secs: u64,
    pub max_frame_mb: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub log_to_file: bool,
    /// Directory for rolling log files (`~` is expanded)
    pub log_dir: String,
}

impl NodeConfig {
    /// Get default configuration file path: `~/.matmul/node.toml`
    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| NodeError::Config("Cannot determine home directory".into()))?;
        Ok(home.join(".matmul").join("node.toml"))
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        tracing::info!(path = %path.display(), "Loading configuration");

        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
            e
        })?;

        let config: NodeConfig = toml::from_str(&content)?;

        config.validate()?;

        tracing::info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Generate default configuration
    pub fn default() -> Self {
        NodeConfig {
            run: RunConfig {
                matrix_size: 6000,
                seed: None,
            },
            transport: TransportConfig {
                coordinator_addr: "127.0.0.1:7070".to_string(),
                connect_timeout_secs: 30,
                max_frame_mb: 1024,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                log_to_file: false,
                log_dir: "~/.matmul/logs".to_string(),
            },
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.run.matrix_size == 0 {
            return Err(NodeError::Config("matrix_size must be at least 1".into()));
        }

        if self.transport.coordinator_addr.rsplit_once(':').is_none() {
            return Err(NodeError::Config(format!(
                "coordinator_addr '{}' must be host:port",
                self.transport.coordinator_addr
            )));
        }

        if self.transport.connect_timeout_secs == 0 {
            return Err(NodeError::Config(
                "connect_timeout_secs must be at least 1".into(),
            ));
        }

        // Frame length prefix is a u32
        if self.transport.max_frame_mb == 0 || self.transport.max_frame_mb > 4095 {
            return Err(NodeError::Config(
                "max_frame_mb must be between 1 and 4095".into(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => {
                return Err(NodeError::Config(
                    "log level must be one of: trace, debug, info, warn, error".into(),
                ))
            }
        }

        Ok(())
    }

    /// Maximum frame size in bytes
    pub fn max_frame_bytes(&self) -> usize {
        self.transport.max_frame_mb * 1024 * 1024
    }

    /// Log directory with `~` expanded
    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.logging.log_dir).into_owned())
    }

    /// Save configuration to file (atomic write)
    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!(path = %path.display(), "Saving configuration");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    tracing::error!(
                        path = %parent.display(),
                        error = %e,
                        "Failed to create config directory"
                    );
                    e
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)?;

        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, &toml_string)?;
        std::fs::rename(&temp_path, path).map_err(|e| {
            tracing::error!(
                from = %temp_path.display(),
                to = %path.display(),
                error = %e,
                "Failed to rename temp config file"
            );
            e
        })?;

        tracing::info!(path = %path.display(), "Configuration saved successfully");
        Ok(())
    }
}
