//! Runtime error types.

use relay_core::DispatchError;
use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during runtime operations.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Loading or reading configuration failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A dispatch through the root handler failed.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// Shutdown signals could not be installed.
    #[error("Failed to listen for shutdown signals: {0}")]
    Signal(#[from] std::io::Error),
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
