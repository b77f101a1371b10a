//! Handlers and their composition.
//!
//! Everything that can service a callback implements [`Handler`]. Leaves
//! ([`Leaf`]) route callbacks to described methods through the policy
//! engine; composites ([`CompositeHandler`], [`Cascade`]) and decorators
//! ([`SemanticsHandler`], [`WithOptions`], [`Intercept`]) wrap other handlers
//! and never look at their methods.
//!
//! # Example
//!
//! ```rust,ignore
//! use relay_core::prelude::*;
//!
//! let handler = chain(Leaf::new(Kennel).into_ref(), [Leaf::new(Vet).into_ref()])
//!     .with_filters(Filters::of(TracingFilter::new()));
//!
//! let dog: Dog = handler.command(Adopt { name: "Rex".into() })?;
//! handler.notify().handle(&Command::new(Feed))?;
//! ```

mod composite;
mod decorator;
mod leaf;
mod proxy;
mod service;

use std::sync::Arc;

use tracing::{Level, debug, span};

use crate::callback::{
    Callback, CallbackOptions, CallbackSemantics, Command, FilterOptions, Inquiry, Options,
};
use crate::filter::FilterProvider;
use crate::foundation::{AnyValue, DispatchError, DispatchResult, Key, Payload, Typed, downcast};
use crate::promise::Promise;

pub use composite::{Cascade, CompositeHandler, chain};
pub use decorator::{Intercept, SemanticsHandler, WithOptions};
pub use leaf::{Leaf, Provider};
pub use proxy::Proxy;
pub use service::{FiltersLayer, HandlerService, SemanticsLayer};

/// A shared, type-erased handler.
pub type HandlerRef = Arc<dyn Handler>;

/// Something that can attempt to service callbacks.
pub trait Handler: AsHandler + Send + Sync + 'static {
    /// Attempts to service `callback`.
    ///
    /// Returns `Ok(true)` if anything handled it. Greedy dispatch offers the
    /// callback to every candidate instead of stopping at the first.
    /// `composer` is the outermost handler of the dispatch; methods and
    /// filters send follow-up callbacks through it.
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool>;
}

/// Views any handler, sized or not, as `&dyn Handler`.
pub trait AsHandler {
    /// Returns `self` as a trait object.
    fn as_handler(&self) -> &dyn Handler;
}

impl<T: Handler> AsHandler for T {
    fn as_handler(&self) -> &dyn Handler {
        self
    }
}

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        (**self).handle_callback(callback, greedy, composer)
    }
}

/// Dispatches `callback` with `handler` as the composer.
///
/// An unhandled callback is an error when its policy is strict, unless
/// the handler's [`CallbackSemantics`] decide `STRICT` explicitly.
pub fn dispatch(handler: &dyn Handler, callback: &dyn Callback, greedy: bool) -> DispatchResult<bool> {
    let span = span!(
        Level::DEBUG,
        "dispatch",
        callback = %callback.describe(),
        policy = callback.policy().name(),
        greedy
    );
    let _enter = span.enter();

    if handler.handle_callback(callback, greedy, handler)? {
        return Ok(true);
    }
    let semantics = Options::<CallbackSemantics>::query(handler)?.unwrap_or_default();
    let strict = if semantics.is_specified(CallbackOptions::STRICT) {
        semantics.has(CallbackOptions::STRICT)
    } else {
        callback.policy().is_strict()
    };
    if strict {
        return Err(DispatchError::not_handled(callback.describe()));
    }
    debug!("callback not handled");
    Ok(false)
}

// =============================================================================
// Caller conveniences
// =============================================================================

/// Dispatch helpers available on every handler.
pub trait HandlerExt: Handler {
    /// Dispatches `callback` until one handler services it.
    fn handle(&self, callback: &dyn Callback) -> DispatchResult<bool> {
        dispatch(self.as_handler(), callback, false)
    }

    /// Offers `callback` to every handler.
    fn handle_all(&self, callback: &dyn Callback) -> DispatchResult<bool> {
        dispatch(self.as_handler(), callback, true)
    }

    /// Sends `payload` and returns the first result, blocking while it is
    /// pending.
    ///
    /// Do not call from inside an async task; use
    /// [`command_async`](HandlerExt::command_async) there.
    fn command<T>(&self, payload: impl Payload + 'static) -> DispatchResult<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.command_async(payload).wait()
    }

    /// Sends `payload` and returns the first result as a promise.
    fn command_async<T>(&self, payload: impl Payload + 'static) -> Promise<T>
    where
        T: Clone + Send + Sync + 'static,
    {
        let command = Command::new(payload);
        match self.handle(&command) {
            Ok(true) => match command.result() {
                Some(result) => result.downcast::<T>(),
                None => Promise::rejected(DispatchError::type_mismatch(
                    std::any::type_name::<T>(),
                    "no result",
                )),
            },
            Ok(false) => Promise::rejected(DispatchError::not_handled(command.describe())),
            Err(e) => Promise::rejected(e),
        }
    }

    /// Sends `payload` to every handler and collects every result.
    fn command_all(&self, payload: impl Payload + 'static) -> Promise<Vec<AnyValue>> {
        let command = Command::many(payload);
        match self.handle_all(&command) {
            Ok(_) => command.results(),
            Err(e) => Promise::rejected(e),
        }
    }

    /// Resolves a `T`, blocking while the provider's result is pending.
    fn resolve<T: Typed + Clone>(&self) -> DispatchResult<Option<T>> {
        self.resolve_key(Key::of::<T>())
    }

    /// Resolves the value provided for `key`.
    fn resolve_key<T>(&self, key: impl Into<Key>) -> DispatchResult<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        let inquiry = Inquiry::new(key);
        if !self.handle(&inquiry)? {
            return Ok(None);
        }
        match inquiry.result() {
            Some(result) => result.wait().and_then(|value| downcast::<T>(&value)).map(Some),
            None => Ok(None),
        }
    }

    /// Resolves every `T` any handler provides, in dispatch order.
    fn resolve_all<T: Typed + Clone>(&self) -> DispatchResult<Vec<T>> {
        let inquiry = Inquiry::many(Key::of::<T>());
        self.handle_all(&inquiry)?;
        inquiry.results_as::<T>().wait()
    }

    /// Resolves a `T` without blocking.
    fn resolve_async<T: Typed + Clone>(&self) -> Promise<Option<T>> {
        let inquiry = Inquiry::of::<T>();
        match self.handle(&inquiry) {
            Ok(true) => match inquiry.result() {
                Some(result) => result.downcast::<T>().map(Some),
                None => Promise::resolved(None),
            },
            Ok(false) => Promise::resolved(None),
            Err(e) => Promise::rejected(e),
        }
    }

    /// Calls the methods of protocol `P` through this handler.
    fn proxy<P: Typed>(&self) -> Proxy<'_, P> {
        Proxy::new(self.as_handler())
    }

    /// Boxes the handler into a [`HandlerRef`].
    fn into_ref(self) -> HandlerRef
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

impl<H: Handler + ?Sized> HandlerExt for H {}

/// Decorators for shared handlers.
pub trait HandlerRefExt {
    /// Applies dispatch semantics.
    fn semantics(&self, semantics: CallbackSemantics) -> HandlerRef;

    /// Offers every callback to every handler.
    fn broadcast(&self) -> HandlerRef {
        self.semantics(CallbackSemantics::new(CallbackOptions::BROADCAST))
    }

    /// Reports every callback as handled.
    fn best_effort(&self) -> HandlerRef {
        self.semantics(CallbackSemantics::new(CallbackOptions::BEST_EFFORT))
    }

    /// Broadcasts on a best-effort basis.
    fn notify(&self) -> HandlerRef {
        self.semantics(CallbackSemantics::new(CallbackOptions::NOTIFY))
    }

    /// Fails on unhandled callbacks whatever their policy.
    fn strict(&self) -> HandlerRef {
        self.semantics(CallbackSemantics::new(CallbackOptions::STRICT))
    }

    /// Adds a filter provider to every method invoked through the handler.
    fn with_filters(&self, provider: impl FilterProvider) -> HandlerRef;

    /// Skips every filter that is not required.
    fn skip_filters(&self) -> HandlerRef;

    /// Runs `around` in place of the handler; it decides whether and how to
    /// proceed.
    fn intercept<F>(&self, around: F) -> HandlerRef
    where
        F: Fn(&dyn Callback, &dyn Fn() -> DispatchResult<bool>) -> DispatchResult<bool>
            + Send
            + Sync
            + 'static;

    /// Tries `self`, then each of `rest`.
    fn chain(&self, rest: impl IntoIterator<Item = HandlerRef>) -> HandlerRef;
}

impl HandlerRefExt for HandlerRef {
    fn semantics(&self, semantics: CallbackSemantics) -> HandlerRef {
        Arc::new(SemanticsHandler::new(self.clone(), semantics))
    }

    fn with_filters(&self, provider: impl FilterProvider) -> HandlerRef {
        let provider: Arc<dyn FilterProvider> = Arc::new(provider);
        Arc::new(WithOptions::new(self.clone(), FilterOptions::with([provider])))
    }

    fn skip_filters(&self) -> HandlerRef {
        Arc::new(WithOptions::new(self.clone(), FilterOptions::skipping()))
    }

    fn intercept<F>(&self, around: F) -> HandlerRef
    where
        F: Fn(&dyn Callback, &dyn Fn() -> DispatchResult<bool>) -> DispatchResult<bool>
            + Send
            + Sync
            + 'static,
    {
        Arc::new(Intercept::new(self.clone(), around))
    }

    fn chain(&self, rest: impl IntoIterator<Item = HandlerRef>) -> HandlerRef {
        chain(self.clone(), rest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Describe, DescriptorBuilder, Invocation, Reply};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping;
    impl Typed for Ping {}

    struct Pong;
    impl Typed for Pong {}

    #[derive(Clone, Debug, PartialEq)]
    struct Version(u32);
    impl Typed for Version {}

    struct Echo {
        hits: AtomicUsize,
    }

    impl Describe for Echo {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|echo: &Self, _: &Ping, _: &Invocation<'_>| {
                echo.hits.fetch_add(1, Ordering::SeqCst);
                Reply::value("pong".to_string())
            });
            d.provides::<Version, _, _>(|_, _| Reply::value(Version(3)));
        }
    }

    fn echo() -> Arc<Leaf<Echo>> {
        Arc::new(Leaf::new(Echo {
            hits: AtomicUsize::new(0),
        }))
    }

    #[test]
    fn test_command_returns_first_result() {
        let leaf = echo();
        let reply: String = leaf.command(Ping).unwrap();
        assert_eq!(reply, "pong");
        assert_eq!(leaf.get().hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strict_policy_reports_unhandled() {
        let err = echo().handle(&Command::new(Pong)).unwrap_err();
        assert!(err.is_not_handled());
    }

    #[test]
    fn test_best_effort_tolerates_unhandled() {
        let handler = echo().into_ref().best_effort();
        assert!(handler.handle(&Command::new(Pong)).unwrap());
    }

    #[test]
    fn test_semantics_can_relax_strict_policy() {
        let relaxed = echo()
            .into_ref()
            .semantics(CallbackSemantics::default().set(CallbackOptions::STRICT, false));
        assert!(!relaxed.handle(&Command::new(Pong)).unwrap());
    }

    #[test]
    fn test_resolve_through_provider() {
        let leaf = echo();
        assert_eq!(leaf.resolve::<Version>().unwrap(), Some(Version(3)));
        assert_eq!(leaf.resolve::<String>().unwrap(), None);
        assert_eq!(leaf.resolve_all::<Version>().unwrap(), [Version(3)]);
    }

    #[tokio::test]
    async fn test_async_conveniences() {
        let handler = echo().into_ref().chain([echo().into_ref()]);
        let reply: String = handler.command_async(Ping).await.unwrap();
        assert_eq!(reply, "pong");

        let all = handler.command_all(Ping).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(handler.resolve_async::<Version>().await.unwrap(), Some(Version(3)));
    }
}
