use thiserror::Error;

/// Errors raised while orchestrating a benchmark sweep.
///
/// A failing benchmark run is not an error: it is recorded as a sentinel
/// row and the sweep moves on. These variants cover the sweep itself.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Configuration error (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error occurred (CSV, log, summary files)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Node processes could not be started at all
    #[error("Launch error: {0}")]
    Launch(String),

    /// Malformed metrics CSV or run summary
    #[error("Parse error: {0}")]
    Parse(String),

    /// TOML (de)serialization failure
    #[error("TOML error: {0}")]
    Toml(String),

    /// JSON (de)serialization failure
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for bench operations.
pub type Result<T> = std::result::Result<T, BenchError>;

impl From<toml::ser::Error> for BenchError {
    fn from(e: toml::ser::Error) -> Self {
        BenchError::Toml(e.to_string())
    }
}

impl From<toml::de::Error> for BenchError {
    fn from(e: toml::de::Error) -> Self {
        BenchError::Toml(e.to_string())
    }
}
