use std::sync::Arc;

use super::{Handler, HandlerRef};
use crate::callback::{Callback, CallbackOptions, CallbackSemantics, Mergeable, Options};
use crate::foundation::DispatchResult;

type Around = dyn Fn(&dyn Callback, &dyn Fn() -> DispatchResult<bool>) -> DispatchResult<bool>
    + Send
    + Sync;

/// Merges `settings` into a matching options callback.
///
/// Returns `None` when `callback` asks for other settings.
fn answer<T: Mergeable>(
    settings: &T,
    inner: &HandlerRef,
    callback: &dyn Callback,
    greedy: bool,
    composer: &dyn Handler,
) -> Option<DispatchResult<bool>> {
    let options = callback.downcast_ref::<Options<T>>()?;
    options.merge(settings);
    if greedy && let Err(e) = inner.handle_callback(callback, greedy, composer) {
        return Some(Err(e));
    }
    Some(Ok(true))
}

/// Answers [`Options<T>`] callbacks with fixed settings.
pub struct WithOptions<T> {
    inner: HandlerRef,
    settings: T,
}

impl<T: Mergeable> WithOptions<T> {
    /// Decorates `inner` with `settings`.
    pub fn new(inner: HandlerRef, settings: T) -> Self {
        Self { inner, settings }
    }

    /// The settings merged into options callbacks.
    pub fn settings(&self) -> &T {
        &self.settings
    }
}

impl<T: Mergeable> Handler for WithOptions<T> {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        match answer(&self.settings, &self.inner, callback, greedy, composer) {
            Some(answered) => answered,
            None => self.inner.handle_callback(callback, greedy, composer),
        }
    }
}

/// Applies [`CallbackSemantics`] to every dispatch through the handler.
///
/// `BROADCAST` makes dispatch greedy; `BEST_EFFORT` reports unhandled
/// callbacks as handled. Errors raised by methods still propagate.
pub struct SemanticsHandler {
    inner: HandlerRef,
    semantics: CallbackSemantics,
}

impl SemanticsHandler {
    /// Decorates `inner` with `semantics`.
    pub fn new(inner: HandlerRef, semantics: CallbackSemantics) -> Self {
        Self { inner, semantics }
    }

    /// The applied semantics.
    pub fn semantics(&self) -> CallbackSemantics {
        self.semantics
    }
}

impl Handler for SemanticsHandler {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        if let Some(answered) = answer(&self.semantics, &self.inner, callback, greedy, composer) {
            return answered;
        }
        if callback.policy().key_of(callback).is_none() {
            return self.inner.handle_callback(callback, greedy, composer);
        }
        let greedy = greedy || self.semantics.has(CallbackOptions::BROADCAST);
        let handled = self.inner.handle_callback(callback, greedy, composer)?;
        Ok(handled || self.semantics.has(CallbackOptions::BEST_EFFORT))
    }
}

/// Runs a closure around every dispatch through the handler.
///
/// The closure receives the callback and a continuation dispatching it to
/// the wrapped handler with the original greediness and composer.
pub struct Intercept {
    inner: HandlerRef,
    around: Arc<Around>,
}

impl Intercept {
    /// Wraps `inner` with `around`.
    pub fn new<F>(inner: HandlerRef, around: F) -> Self
    where
        F: Fn(&dyn Callback, &dyn Fn() -> DispatchResult<bool>) -> DispatchResult<bool>
            + Send
            + Sync
            + 'static,
    {
        Self {
            inner,
            around: Arc::new(around),
        }
    }
}

impl Handler for Intercept {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        let proceed = || self.inner.handle_callback(callback, greedy, composer);
        (self.around)(callback, &proceed)
    }
}

impl std::fmt::Debug for Intercept {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Intercept").finish_non_exhaustive()
    }
}

impl std::fmt::Debug for SemanticsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SemanticsHandler")
            .field("semantics", &self.semantics.options())
            .finish_non_exhaustive()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for WithOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WithOptions")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Command;
    use crate::foundation::{DispatchError, Typed};
    use crate::handler::{HandlerExt, HandlerRefExt, Leaf, chain};
    use crate::policy::{Describe, DescriptorBuilder, Invocation};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Alert;
    impl Typed for Alert {}

    struct Boom;
    impl Typed for Boom {}

    struct Listener {
        heard: Arc<AtomicUsize>,
    }

    impl Describe for Listener {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|me: &Self, _: &Alert, _: &Invocation<'_>| {
                me.heard.fetch_add(1, Ordering::SeqCst);
            });
            d.handles(|_: &Self, _: &Boom, _: &Invocation<'_>| {
                Err::<(), _>(DispatchError::custom("boom"))
            });
        }
    }

    fn listeners(n: usize) -> (HandlerRef, Arc<AtomicUsize>) {
        let heard = Arc::new(AtomicUsize::new(0));
        let mut all: Vec<HandlerRef> = (0..n)
            .map(|_| Leaf::new(Listener { heard: heard.clone() }).into_ref())
            .collect();
        let first = all.remove(0);
        (chain(first, all), heard)
    }

    #[test]
    fn test_broadcast_reaches_every_handler() {
        let (handler, heard) = listeners(3);
        assert!(handler.broadcast().handle(&Command::new(Alert)).unwrap());
        assert_eq!(heard.load(Ordering::SeqCst), 3);

        heard.store(0, Ordering::SeqCst);
        assert!(handler.handle(&Command::new(Alert)).unwrap());
        assert_eq!(heard.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_still_propagates_method_errors() {
        let (handler, _) = listeners(2);
        let err = handler.notify().handle(&Command::new(Boom)).unwrap_err();
        assert!(matches!(err, DispatchError::MethodFault { ref method, .. } if !method.is_empty()));
    }

    #[test]
    fn test_outer_semantics_override_inner() {
        let (handler, _) = listeners(1);
        let relaxed = CallbackSemantics::default().set(CallbackOptions::STRICT, false);
        let decorated = handler.strict().semantics(relaxed);
        let semantics = Options::<CallbackSemantics>::query(&*decorated).unwrap().unwrap();
        assert!(!semantics.has(CallbackOptions::STRICT));
    }

    #[test]
    fn test_intercept_wraps_dispatch() {
        let (handler, heard) = listeners(1);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let intercepted = handler.intercept(move |_, proceed| {
            counter.fetch_add(1, Ordering::SeqCst);
            proceed()
        });
        assert!(intercepted.handle(&Command::new(Alert)).unwrap());
        assert_eq!(heard.load(Ordering::SeqCst), 1);
        assert!(seen.load(Ordering::SeqCst) >= 1);
    }
}
