//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while setting up shared infrastructure
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid log filter directive '{directive}': {reason}")]
    FilterDirective { directive: String, reason: String },

    #[error("Failed to install global subscriber: {0}")]
    Subscriber(String),
}

impl CommonError {
    /// Create a configuration error for a variable that failed to parse
    pub fn invalid_value(variable: &str, value: &str) -> Self {
        Self::Config(format!("invalid value '{}' for {}", value, variable))
    }
}
