//! Error types for the simulator.

use tierload_core::{ConfigError, LoaderError};
use tierload_storage::PersistenceError;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error("Cache snapshot error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Invalid argument {name}: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("Failed to init tracing: {0}")]
    Tracing(String),
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
