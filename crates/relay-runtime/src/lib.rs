//! Relay Runtime - configuration, logging and bootstrap for relay.
//!
//! This crate provides:
//! - Layered configuration loading (`ConfigLoader`, `RelayConfig`)
//! - Logging setup over `tracing-subscriber` (`LoggingBuilder`)
//! - A configured root context (`RelayRuntime`)
//!
//! ```ignore
//! use relay_runtime::RelayRuntime;
//!
//! #[tokio::main]
//! async fn main() -> relay_runtime::RuntimeResult<()> {
//!     let runtime = RelayRuntime::builder()
//!         .config_file("relay.toml")
//!         .build()?;
//!
//!     runtime.root().add_handlers(handlers());
//!     runtime.run_until_signal().await
//! }
//! ```
//!
//! # Configuration
//!
//! ```toml
//! [logging]
//! level = "debug"
//! filters = { relay_core = "trace" }
//!
//! [dispatch]
//! track_promises = true
//! trace_methods = false
//! default_timeout_ms = 5000
//!
//! [handlers.billing]
//! currency = "EUR"
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, ConfigLoader, ConfigResult, RelayConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use runtime::{RelayRuntime, RuntimeBuilder};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Logging macros and span helpers.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
