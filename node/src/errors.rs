use thiserror::Error;

/// Errors that can occur while running one rank of a distributed multiply.
#[derive(Error, Debug)]
pub enum NodeError {
    /// Matrix dimension is not evenly divisible by the number of workers.
    ///
    /// Every rank detects this identically, so the whole group aborts
    /// without entering another collective.
    #[error("Invalid partition: matrix size {matrix_size} is not divisible by {world_size} workers")]
    InvalidPartition {
        matrix_size: usize,
        world_size: usize,
    },

    /// Collective transport failure (peer hang-up, frame mismatch, rendezvous timeout, etc.)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Not enough memory to hold a matrix or row-block
    #[error("Allocation failure: could not reserve {elements} matrix elements")]
    Allocation { elements: usize },

    /// Buffer or matrix dimensions do not line up
    #[error("Shape error: {0}")]
    Shape(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error occurred (file operations, sockets, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl NodeError {
    /// Whether this error is the deterministic divisibility abort.
    pub fn is_invalid_partition(&self) -> bool {
        matches!(self, NodeError::InvalidPartition { .. })
    }
}

/// Result type alias for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

impl From<toml::ser::Error> for NodeError {
    fn from(e: toml::ser::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(e: serde_json::Error) -> Self {
        NodeError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::InvalidPartition {
            matrix_size: 6,
            world_size: 4,
        };
        assert_eq!(
            err.to_string(),
            "Invalid partition: matrix size 6 is not divisible by 4 workers"
        );
        assert!(err.is_invalid_partition());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "peer reset");
        let node_err: NodeError = io_err.into();
        assert!(node_err.to_string().contains("IO error"));
        assert!(!node_err.is_invalid_partition());
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<usize> {
            Ok(6000)
        }

        assert_eq!(returns_result().unwrap(), 6000);
    }
}
