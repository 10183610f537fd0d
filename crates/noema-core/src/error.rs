use thiserror::Error;

/// Top-level error type for the Noema core types.
#[derive(Error, Debug)]
pub enum NoemaError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invariant violated: {0}")]
    Invariant(String),

    #[error("Invalid alert transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
