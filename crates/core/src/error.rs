//! Error types for differentially private training.

/// Errors that can occur while accounting, preprocessing or training.
#[derive(Debug, thiserror::Error)]
pub enum DpError {
    /// Invalid parameter provided.
    #[error("invalid parameter: {msg}")]
    InvalidParameters {
        /// Human-readable error description.
        msg: String,
    },

    /// Numerical computation error.
    #[error("numerical error: {msg}")]
    NumericalError {
        /// Human-readable error description.
        msg: String,
    },

    /// Data does not have the shape a model or operation expects.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Expected shape.
        expected: Vec<usize>,
        /// Shape actually provided.
        actual: Vec<usize>,
    },

    /// Malformed or inconsistent input data.
    #[error("data error: {msg}")]
    DataError {
        /// Human-readable error description.
        msg: String,
    },

    /// Configuration error.
    #[error("configuration error: {msg}")]
    ConfigError {
        /// Human-readable error description.
        msg: String,
    },

    /// A report or document could not be encoded or decoded.
    #[error("serialization error: {msg}")]
    SerializationError {
        /// Human-readable error description.
        msg: String,
    },

    /// Unsupported feature or configuration.
    #[error("unsupported feature: {msg}")]
    UnsupportedFeature {
        /// Human-readable error description.
        msg: String,
    },

    /// Underlying I/O failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for DP operations.
pub type Result<T> = std::result::Result<T, DpError>;

impl DpError {
    /// Create an invalid parameter error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameters { msg: msg.into() }
    }

    /// Create a numerical error.
    pub fn numerical<S: Into<String>>(msg: S) -> Self {
        Self::NumericalError { msg: msg.into() }
    }

    /// Create a shape mismatch error.
    pub fn shape(expected: &[usize], actual: &[usize]) -> Self {
        Self::ShapeMismatch {
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }

    /// Create a data error.
    pub fn data<S: Into<String>>(msg: S) -> Self {
        Self::DataError { msg: msg.into() }
    }

    /// Create a configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError { msg: msg.into() }
    }

    /// Create a serialization error.
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError { msg: msg.into() }
    }

    /// Create an unsupported feature error.
    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFeature { msg: msg.into() }
    }
}
