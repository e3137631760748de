//! Error types for the rate-limit load generator
//!
//! HTTP failures are never errors here: they are recorded as statistics.
//! These variants cover local misuse and misconfiguration only.

use thiserror::Error;

/// Result type alias for load generator operations
pub type Result<T> = std::result::Result<T, LoadTestError>;

/// Errors raised while building profiles, users or the swarm
#[derive(Error, Debug)]
pub enum LoadTestError {
    // === Profile Construction ===
    /// A weighted table entry has a zero weight
    #[error("Invalid weight {weight} for entry {key}: weights must be positive")]
    InvalidWeight { key: String, weight: u32 },

    /// A weighted table lists the same key twice
    #[error("Duplicate key in weighted table: {0}")]
    DuplicateKey(String),

    /// A weighted table has no entries
    #[error("Weighted table has no entries")]
    EmptyTable,

    /// Wait bounds are negative, non-finite or inverted
    #[error("Invalid wait interval [{min}, {max}]")]
    InvalidWaitInterval { min: f64, max: f64 },

    /// A profile issues no requests per public check
    #[error("Call count must be positive")]
    InvalidCallCount,

    // === Virtual User Lifecycle ===
    /// `on_start` was invoked on a user that already has an identifier
    #[error("Virtual user already started as {0}")]
    AlreadyStarted(String),

    /// A task ran before `on_start` assigned an identifier
    #[error("Virtual user has not been started")]
    NotStarted,

    // === Harness ===
    /// Rejected configuration value
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// HTTP client could not be built
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    /// Prometheus registry failure
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Summary serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Output file failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<prometheus::Error> for LoadTestError {
    fn from(err: prometheus::Error) -> Self {
        Self::Metrics(err.to_string())
    }
}

impl LoadTestError {
    /// Whether the error comes from a malformed profile definition
    pub fn is_profile_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidWeight { .. }
                | Self::DuplicateKey(_)
                | Self::EmptyTable
                | Self::InvalidWaitInterval { .. }
                | Self::InvalidCallCount
        )
    }
}
