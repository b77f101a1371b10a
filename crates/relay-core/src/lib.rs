//! # Relay Core
//!
//! In-process request dispatch. Callers describe what they want as a
//! callback ("handle this command", "provide a value of this type") and the
//! runtime finds the handlers able to service it.
//!
//! ## Layers
//!
//! ### Foundation
//!
//! - **Errors**: every failure is a [`DispatchError`]
//! - **Type descriptors**: [`TypeKey`] and [`Key`] drive variance matching
//! - **Promises**: [`Promise`] is the asynchronous result of every dispatch
//! - **Traversal**: [`graph`] walks any parent/child structure along an [`Axis`]
//!
//! ### Dispatch
//!
//! - **Policies**: [`Policy`] matches callbacks to handler methods by variance
//! - **Callbacks**: [`Command`], [`Inquiry`] and [`Options`]
//! - **Filters**: ordered [`Filter`] chains around each method invocation
//! - **Handlers**: [`Leaf`] handlers, composites and decorators
//!
//! ### Scopes
//!
//! - **Contexts**: [`Context`] trees holding handlers, with lifecycle events
//!   and promise tracking
//!
//! ## Flow
//!
//! ```text
//! ┌──────────┐     ┌─────────┐     ┌──────────────┐     ┌─────────┐
//! │ Callback │────▶│ Handler │────▶│ Policy match │────▶│ Filters │──▶ method
//! └──────────┘     └─────────┘     └──────────────┘     └─────────┘
//!       ▲                                                     │
//!       └──────────────────── response ◀──────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use relay_core::prelude::*;
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
//! let context = Context::with_handlers([Leaf::new(Greeter).into_ref()]);
//! let reply: String = context.command(Greet("relay".into()))?;
//! ```

pub mod callback;
pub mod context;
pub mod filter;
pub mod foundation;
pub mod graph;
pub mod handler;
pub mod policy;
pub mod promise;

pub use callback::{
    Callback, CallbackOptions, CallbackSemantics, Command, FilterOptions, HandleMethod, Inquiry,
    Mergeable, Options, Response,
};
pub use context::{Context, ContextId, ContextState, EndReason, SubscriptionId};
pub use filter::{Filter, FilterProvider, Filters, Next, TracingFilter};
pub use foundation::{
    AnyValue, DispatchError, DispatchResult, Key, Payload, TypeKey, TypeParam, Typed,
};
pub use graph::{Axis, Traversing};
pub use handler::{
    Handler, HandlerExt, HandlerRef, HandlerRefExt, HandlerService, Leaf, Provider, Proxy,
};
pub use policy::{Describe, DescriptorBuilder, HandlerDescriptor, Invocation, Policy, Reply};
pub use promise::{CancelMode, Promise, PromiseState, Resolver};

/// Convenience re-exports for handler authors.
pub mod prelude {
    pub use super::callback::{Callback, CallbackOptions, CallbackSemantics, Command, Inquiry};
    pub use super::context::{Context, EndReason};
    pub use super::filter::{Filter, FilterProvider, Filters, Next};
    pub use super::foundation::{DispatchError, DispatchResult, Key, Payload, TypeKey, Typed};
    pub use super::graph::Axis;
    pub use super::handler::{Handler, HandlerExt, HandlerRef, HandlerRefExt, Leaf, Proxy};
    pub use super::policy::{Describe, DescriptorBuilder, Invocation, Reply};
    pub use super::promise::Promise;
}
