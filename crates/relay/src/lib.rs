//! # Relay
//!
//! In-process request dispatch with composable handlers.
//!
//! ## Overview
//!
//! Callers state what they need as a callback: a [`Command`](prelude::Command)
//! to be handled or an [`Inquiry`](prelude::Inquiry) for a value. Handlers
//! declare the methods they offer and a policy matches callbacks to methods
//! by type variance. Filters wrap each method invocation, and handlers are
//! composed into chains, decorated, and organized into context trees.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌──────────────────────────────────────────────┐
//! │   Runtime   │────▶│ Root context                                 │
//! │  (config,   │     │   handlers ──▶ policy match ──▶ filters ──▶ method
//! │   logging)  │     │   └── child contexts (fall back to parent)   │
//! └─────────────┘     └──────────────────────────────────────────────┘
//! ```
//!
//! - **Runtime**: Loads configuration, sets up logging, owns the root context
//! - **Contexts**: Scopes holding handlers, ended as a tree
//! - **Handlers**: Described types, composites and decorators
//! - **Promises**: Cancellable results of every dispatch
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use relay::prelude::*;
//!
//! struct Greet(String);
//! impl Typed for Greet {}
//!
//! struct Greeter;
//!
//! impl Describe for Greeter {
//!     fn describe(d: &mut DescriptorBuilder<Self>) {
//!         d.handles(|_: &Self, greet: &Greet, _: &Invocation<'_>| {
//!             Reply::value(format!("hello, {}", greet.0))
//!         });
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> relay::runtime::RuntimeResult<()> {
//!     let runtime = RelayRuntime::new();
//!     runtime.root().add_handlers([Leaf::new(Greeter).into_ref()]);
//!
//!     let reply: String = runtime.command(Greet("relay".into())).await?;
//!     println!("{reply}");
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config`: Load `relay.toml` configuration files (default)
//! - `yaml-config`: Load `relay.yaml` configuration files
//! - `json-log`: JSON log output

pub use relay_core as core;
pub use relay_runtime as runtime;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use relay::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use relay_runtime::{RelayConfig, RelayRuntime};

    // Dispatch
    pub use relay_core::prelude::*;
    pub use relay_core::{HandlerService, Provider};

    // Results
    pub use relay_core::{CancelMode, PromiseState, Resolver};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    struct Greet(String);
    impl Typed for Greet {}

    struct Greeter;

    impl Describe for Greeter {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|_: &Self, greet: &Greet, _: &Invocation<'_>| {
                Reply::value(format!("hello, {}", greet.0))
            });
        }
    }

    #[tokio::test]
    async fn test_prelude_covers_quick_start() {
        let runtime = RelayRuntime::from_config(RelayConfig::default());
        runtime
            .root()
            .add_handlers([Leaf::new(Greeter).into_ref()]);

        let reply: String = runtime.command(Greet("relay".into())).await.unwrap();
        assert_eq!(reply, "hello, relay");
    }
}
