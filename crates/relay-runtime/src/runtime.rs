//! Bootstrap of a configured root context.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use relay_runtime::RelayRuntime;
//!
//! // Loads relay.toml from the current directory if present
//! let runtime = RelayRuntime::new();
//! runtime.root().add_handlers([Leaf::new(Billing::default()).into_ref()]);
//!
//! let total: u64 = runtime.command(Invoice::new(42)).await?;
//! runtime.run_until_signal().await?;
//! ```

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use relay_core::filter::{Filters, TracingFilter};
use relay_core::{Context, EndReason, HandlerExt, HandlerRef, HandlerRefExt, Payload, Promise};
use serde::de::DeserializeOwned;
use tokio::signal;
use tracing::{debug, info, warn};

use crate::config::{ConfigLoader, ConfigResult, DispatchConfig, RelayConfig};
use crate::error::RuntimeResult;
use crate::logging;

/// A root context with logging and dispatch set up from configuration.
///
/// The root is ended with [`EndReason::Disposed`] by
/// [`shutdown`](RelayRuntime::shutdown) or when the runtime is dropped.
pub struct RelayRuntime {
    config: RelayConfig,
    root: Arc<Context>,
    handler: HandlerRef,
}

impl RelayRuntime {
    /// Creates a runtime from the configuration found in the current
    /// directory, falling back to defaults.
    pub fn new() -> Self {
        Self::load_or_default(ConfigLoader::new().with_current_dir())
    }

    /// Falls back to defaults when `loader` fails, warning once logging is up.
    fn load_or_default(loader: ConfigLoader) -> Self {
        match loader.load() {
            Ok(config) => Self::from_config(config),
            Err(e) => {
                let runtime = Self::from_config(RelayConfig::default());
                warn!(error = %e, "Failed to load config, using defaults");
                runtime
            }
        }
    }

    /// Creates a runtime builder for custom configuration.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from an already loaded configuration.
    ///
    /// Installs the global log subscriber unless one is already set.
    pub fn from_config(config: RelayConfig) -> Self {
        logging::init_from_config(&config.logging);

        let root = Context::new();
        let handler = Self::compose(&root, &config.dispatch);

        info!(
            context = %root.id(),
            log_level = %config.logging.level,
            track_promises = config.dispatch.track_promises,
            trace_methods = config.dispatch.trace_methods,
            handler_sections = config.handlers.len(),
            "Runtime initialized from configuration"
        );

        Self {
            config,
            root,
            handler,
        }
    }

    fn compose(root: &Arc<Context>, dispatch: &DispatchConfig) -> HandlerRef {
        let mut handler: HandlerRef = if dispatch.track_promises {
            root.track_promises()
        } else {
            root.clone()
        };
        if dispatch.trace_methods {
            handler = handler.with_filters(Filters::of(TracingFilter::new()));
        }
        handler
    }

    /// The loaded configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The root context.
    pub fn root(&self) -> &Arc<Context> {
        &self.root
    }

    /// The root decorated according to the dispatch configuration.
    pub fn handler(&self) -> HandlerRef {
        self.handler.clone()
    }

    /// Creates a child of the root.
    pub fn create_child(&self) -> RuntimeResult<Arc<Context>> {
        Ok(self.root.create_child()?)
    }

    /// Reads the handler section `name` as a `T`.
    pub fn handler_config<T: DeserializeOwned>(&self, name: &str) -> RuntimeResult<Option<T>> {
        Ok(self.config.handler(name)?)
    }

    /// Sends `payload` through [`handler`](RelayRuntime::handler).
    ///
    /// The result is rejected with
    /// [`DispatchError::Timeout`](relay_core::DispatchError::Timeout) when
    /// `dispatch.default_timeout_ms` is set and elapses first.
    pub fn command_async<T>(&self, payload: impl Payload + 'static) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let result = self.handler.command_async::<T>(payload);
        match self.config.dispatch.default_timeout() {
            Some(timeout) => result.timeout(timeout),
            None => result,
        }
    }

    /// Sends `payload` and awaits its result.
    pub async fn command<T>(&self, payload: impl Payload + 'static) -> RuntimeResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        Ok(self.command_async::<T>(payload).await?)
    }

    /// Returns whether the root is still active.
    pub fn is_running(&self) -> bool {
        self.root.is_active()
    }

    /// Ends the root context, cancelling every tracked promise.
    ///
    /// Returns `false` if it had already ended.
    pub fn shutdown(&self) -> bool {
        let ended = self.root.end_with(EndReason::Disposed);
        if ended {
            info!(context = %self.root.id(), "Runtime shut down");
        }
        ended
    }

    /// Runs until `shutdown` completes or the root ends, then shuts down.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let token = self.root.cancellation_token();
        tokio::select! {
            _ = shutdown => debug!("Shutdown future completed"),
            _ = token.cancelled() => debug!("Root context ended"),
        }
        self.shutdown();
    }

    /// Runs until Ctrl+C (or SIGTERM on Unix), then shuts down.
    pub async fn run_until_signal(&self) -> RuntimeResult<()> {
        info!("Relay runtime is now running. Press Ctrl+C to stop.");

        #[cfg(unix)]
        {
            let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
            let token = self.root.cancellation_token();
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                _ = token.cancelled() => debug!("Root context ended"),
            }
        }

        #[cfg(not(unix))]
        {
            let token = self.root.cancellation_token();
            tokio::select! {
                result = signal::ctrl_c() => {
                    result?;
                    info!("Received Ctrl+C, shutting down");
                }
                _ = token.cancelled() => debug!("Root context ended"),
            }
        }

        self.shutdown();
        Ok(())
    }
}

impl Default for RelayRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RelayRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for RelayRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayRuntime")
            .field("root", &self.root)
            .field("dispatch", &self.config.dispatch)
            .finish_non_exhaustive()
    }
}

impl From<RelayConfig> for RelayRuntime {
    fn from(config: RelayConfig) -> Self {
        Self::from_config(config)
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for a [`RelayRuntime`] with custom configuration.
///
/// ```rust,ignore
/// let runtime = RelayRuntime::builder()
///     .config_file("config/relay.toml")
///     .profile("production")
///     .build()?;
/// ```
#[derive(Debug)]
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
}

impl RuntimeBuilder {
    /// Searches the current directory by default.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Disables environment overrides.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges configuration programmatically, below files and environment.
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> ConfigResult<RelayRuntime> {
        let config = self.config_loader.load()?;
        Ok(RelayRuntime::from_config(config))
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuntimeError;
    use relay_core::{
        Describe, DescriptorBuilder, DispatchError, Invocation, Leaf, Reply, Resolver, Typed,
    };
    use serde::Deserialize;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Price;
    impl Typed for Price {}

    struct Quote;
    impl Typed for Quote {}

    #[derive(Default)]
    struct Desk {
        stalled: Mutex<Vec<Resolver<u32>>>,
    }

    impl Describe for Desk {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|_: &Self, _: &Price, _: &Invocation<'_>| Reply::value(42u32));
            d.handles(|desk: &Self, _: &Quote, _: &Invocation<'_>| {
                let (promise, resolver) = Promise::<u32>::pending();
                desk.stalled.lock().unwrap().push(resolver);
                promise
            });
        }
    }

    fn runtime(configure: impl FnOnce(&mut RelayConfig)) -> RelayRuntime {
        let mut config = RelayConfig::default();
        configure(&mut config);
        let runtime = RelayRuntime::from_config(config);
        runtime
            .root()
            .add_handlers([Leaf::new(Desk::default()).into_ref()]);
        runtime
    }

    #[tokio::test]
    async fn test_command_through_root() {
        let runtime = runtime(|_| {});
        let price: u32 = runtime.command(Price).await.unwrap();
        assert_eq!(price, 42);

        let child = runtime.create_child().unwrap();
        assert_eq!(child.command::<u32>(Price).unwrap(), 42);
    }

    #[tokio::test]
    async fn test_default_timeout() {
        let runtime = runtime(|config| config.dispatch.default_timeout_ms = Some(20));
        let err = runtime.command::<u32>(Quote).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Dispatch(DispatchError::Timeout(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_cancels_tracked_results() {
        let runtime = runtime(|_| {});
        let pending = runtime.command_async::<u32>(Quote);
        assert!(pending.is_pending());

        assert!(runtime.shutdown());
        assert!(!runtime.shutdown());
        assert!(!runtime.is_running());
        assert!(pending.await.unwrap_err().is_cancelled());
        assert!(matches!(
            runtime.create_child(),
            Err(RuntimeError::Dispatch(DispatchError::ContextEnded))
        ));
    }

    #[tokio::test]
    async fn test_untracked_results_survive_shutdown() {
        let runtime = runtime(|config| config.dispatch.track_promises = false);
        let pending = runtime.command_async::<u32>(Quote);
        runtime.shutdown();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(pending.is_pending());
    }

    #[tokio::test]
    async fn test_traced_methods_still_dispatch() {
        let runtime = runtime(|config| config.dispatch.trace_methods = true);
        assert_eq!(runtime.command::<u32>(Price).await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_run_until_shuts_down() {
        let runtime = runtime(|_| {});
        runtime.run_until(async {}).await;
        assert!(!runtime.is_running());
    }

    #[test]
    fn test_handler_config() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct DeskSettings {
            currency: String,
        }

        let runtime = runtime(|config| {
            config.handlers.insert(
                "desk".to_string(),
                serde_json::json!({ "currency": "EUR" }),
            );
        });
        let desk: Option<DeskSettings> = runtime.handler_config("desk").unwrap();
        assert_eq!(desk.unwrap().currency, "EUR");
        assert!(runtime.handler_config::<DeskSettings>("other").unwrap().is_none());
    }

    #[test]
    fn test_unreadable_config_falls_back_to_defaults() {
        let loader = ConfigLoader::new()
            .without_env()
            .file("/nonexistent/relay/relay.toml");
        let runtime = RelayRuntime::load_or_default(loader);
        assert!(runtime.config().dispatch.track_promises);
        assert!(runtime.is_running());
    }
}
