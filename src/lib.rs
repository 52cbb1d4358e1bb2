//! SocioLens sentiment serving core
//!
//! Multiplexes HTTP classification traffic over a fixed pool of
//! accelerator-pinned workers, records per-endpoint response times and
//! samples service readiness in the background.

pub mod captions;
pub mod core;
pub mod engine;
pub mod inference;
pub mod infrastructure;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use infrastructure::config::{Config, PoolConfig, ServerConfig};

use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum SocioLensError {
    #[error("Classifier backend error: {0}")]
    Classifier(#[from] inference::ClassifierError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] inference::PoolError),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, SocioLensError>;
