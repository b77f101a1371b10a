//! Configuration module for the relay runtime.
//!
//! Loads logging, dispatch and per-handler settings from files and the
//! environment, and validates them.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DispatchConfig, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig, RelayConfig,
    SpanEventConfig,
};
pub use validation::validate_config;
