//! Cancellable promise used as the asynchronous result of every dispatch.
//!
//! A [`Promise`] settles exactly once: resolved with a value, rejected with a
//! [`DispatchError`], or cancelled. Cancellation is a rejection carrying
//! [`DispatchError::Cancelled`] and is reported as its own
//! [`PromiseState`].
//!
//! # Lifecycle
//!
//! ```text
//!              resolve(v)
//!           ┌────────────▶ Resolved
//!           │
//!  Pending ─┼────────────▶ Rejected
//!           │  reject(e)
//!           │
//!           └────────────▶ Cancelled
//!              cancel()
//! ```
//!
//! Continuations ([`then`](Promise::then), [`catch`](Promise::catch),
//! [`finally`](Promise::finally), ...) return derived promises. Continuations
//! added after settlement run immediately on the calling thread. Cancelling a
//! derived promise cancels its source according to the source's
//! [`CancelMode`].
//!
//! # Example
//!
//! ```rust,ignore
//! let (promise, resolver) = Promise::<u32>::pending();
//! let doubled = promise.then(|v| Ok(v * 2));
//!
//! resolver.resolve(21);
//! assert_eq!(doubled.wait()?, 42);
//! ```

mod combinators;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::foundation::{AnyValue, DispatchError, DispatchResult};

type Listener<T> = Box<dyn FnOnce(&DispatchResult<T>) + Send>;
type CancelHook = Box<dyn FnOnce() + Send>;

/// Observable state of a [`Promise`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseState {
    /// Not settled yet.
    Pending,
    /// Settled with a value.
    Resolved,
    /// Settled with an error other than cancellation.
    Rejected,
    /// Settled by cancellation.
    Cancelled,
}

/// When cancelling derived promises cancels their source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CancelMode {
    /// The source is cancelled once every derived promise has been cancelled.
    #[default]
    All,
    /// The source is cancelled as soon as any derived promise is cancelled.
    Any,
}

struct Shared<T> {
    state: Mutex<State<T>>,
    settled: Condvar,
    mode: CancelMode,
}

struct State<T> {
    outcome: Option<DispatchResult<T>>,
    listeners: Vec<Listener<T>>,
    cancel_hooks: Vec<CancelHook>,
    wakers: Vec<Waker>,
    children: usize,
}

impl<T: Clone> Shared<T> {
    fn new(mode: CancelMode) -> Self {
        Self {
            state: Mutex::new(State {
                outcome: None,
                listeners: Vec::new(),
                cancel_hooks: Vec::new(),
                wakers: Vec::new(),
                children: 0,
            }),
            settled: Condvar::new(),
            mode,
        }
    }

    fn settle(&self, outcome: DispatchResult<T>) -> bool {
        let cancelled = matches!(&outcome, Err(e) if e.is_cancelled());
        let (listeners, wakers, hooks) = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return false;
            }
            state.outcome = Some(outcome.clone());
            let hooks = std::mem::take(&mut state.cancel_hooks);
            (
                std::mem::take(&mut state.listeners),
                std::mem::take(&mut state.wakers),
                hooks,
            )
        };
        self.settled.notify_all();
        if cancelled {
            for hook in hooks {
                hook();
            }
        }
        for listener in listeners {
            listener(&outcome);
        }
        for waker in wakers {
            waker.wake();
        }
        true
    }

    fn on_cancel(&self, hook: CancelHook) {
        let mut state = self.state.lock();
        match &state.outcome {
            None => state.cancel_hooks.push(hook),
            Some(Err(e)) if e.is_cancelled() => {
                drop(state);
                hook();
            }
            Some(_) => {}
        }
    }

    fn subscribe(&self, listener: Listener<T>) {
        let mut state = self.state.lock();
        match state.outcome.clone() {
            Some(outcome) => {
                drop(state);
                listener(&outcome);
            }
            None => state.listeners.push(listener),
        }
    }

    fn child_cancelled(&self) {
        let cancel = {
            let mut state = self.state.lock();
            if state.outcome.is_some() {
                return;
            }
            match self.mode {
                CancelMode::Any => true,
                CancelMode::All => {
                    state.children = state.children.saturating_sub(1);
                    state.children == 0
                }
            }
        };
        if cancel {
            self.settle(Err(DispatchError::cancelled("dependents cancelled")));
        }
    }
}

// =============================================================================
// Promise
// =============================================================================

/// A cancellable, shareable asynchronous result.
///
/// Cloning a promise yields another handle to the same settlement.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Creates a promise and runs `executor` immediately with its resolver.
    ///
    /// An error returned by the executor rejects the promise. The resolver
    /// may be moved elsewhere to settle the promise later.
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>) -> DispatchResult<()>,
    {
        let (promise, resolver) = Self::pending();
        if let Err(err) = executor(resolver.clone()) {
            resolver.reject(err);
        }
        promise
    }

    /// Creates a pending promise and the resolver that settles it.
    pub fn pending() -> (Self, Resolver<T>) {
        Self::with_mode(CancelMode::All)
    }

    /// Creates a pending promise with an explicit [`CancelMode`].
    pub fn with_mode(mode: CancelMode) -> (Self, Resolver<T>) {
        let shared = Arc::new(Shared::new(mode));
        (
            Self {
                shared: shared.clone(),
            },
            Resolver { shared },
        )
    }

    /// A promise already resolved with `value`.
    pub fn resolved(value: T) -> Self {
        let (promise, resolver) = Self::with_mode(CancelMode::Any);
        resolver.resolve(value);
        promise
    }

    /// A promise already rejected with `error`.
    pub fn rejected(error: DispatchError) -> Self {
        let (promise, resolver) = Self::with_mode(CancelMode::Any);
        resolver.reject(error);
        promise
    }

    /// A promise already cancelled.
    pub fn cancelled() -> Self {
        Self::rejected(DispatchError::cancelled("cancelled"))
    }

    /// Current state.
    pub fn state(&self) -> PromiseState {
        match &self.shared.state.lock().outcome {
            None => PromiseState::Pending,
            Some(Ok(_)) => PromiseState::Resolved,
            Some(Err(e)) if e.is_cancelled() => PromiseState::Cancelled,
            Some(Err(_)) => PromiseState::Rejected,
        }
    }

    /// Returns `true` until the promise settles.
    pub fn is_pending(&self) -> bool {
        self.state() == PromiseState::Pending
    }

    /// The settled outcome, if any.
    pub fn outcome(&self) -> Option<DispatchResult<T>> {
        self.shared.state.lock().outcome.clone()
    }

    /// Returns `true` if both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Cancels the promise if it is still pending.
    pub fn cancel(&self) -> bool {
        self.cancel_with("cancelled")
    }

    /// Cancels the promise with a reason.
    pub fn cancel_with(&self, reason: impl Into<String>) -> bool {
        self.shared.settle(Err(DispatchError::cancelled(reason)))
    }

    /// Registers `f` to observe the settled outcome.
    pub fn on_settled<F>(&self, f: F)
    where
        F: FnOnce(&DispatchResult<T>) + Send + 'static,
    {
        self.shared.subscribe(Box::new(f));
    }

    /// Registers `f` to run only if the promise is cancelled.
    pub fn on_cancelled<F>(&self, f: F)
    where
        F: FnOnce(&DispatchError) + Send + 'static,
    {
        self.on_settled(move |outcome| {
            if let Err(e) = outcome
                && e.is_cancelled()
            {
                f(e);
            }
        });
    }

    fn derive<R: Clone + Send + Sync + 'static>(&self) -> (Promise<R>, Resolver<R>) {
        let (child, resolver) = Promise::with_mode(self.shared.mode);
        self.shared.state.lock().children += 1;
        let parent: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        resolver.on_cancel(move || {
            if let Some(parent) = parent.upgrade() {
                parent.child_cancelled();
            }
        });
        (child, resolver)
    }

    /// Continues with `on_resolved` or `on_rejected`.
    ///
    /// Cancellation passes through untouched; neither callback sees it.
    pub fn then_or_else<R, F, G>(&self, on_resolved: F, on_rejected: G) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> DispatchResult<R> + Send + 'static,
        G: FnOnce(DispatchError) -> DispatchResult<R> + Send + 'static,
    {
        let (child, resolver) = self.derive();
        self.on_settled(move |outcome| {
            let next = match outcome {
                Ok(value) => on_resolved(value.clone()),
                Err(e) if e.is_cancelled() => Err(e.clone()),
                Err(e) => on_rejected(e.clone()),
            };
            resolver.settle(next);
        });
        child
    }

    /// Continues with `on_resolved`; rejections pass through.
    pub fn then<R, F>(&self, on_resolved: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> DispatchResult<R> + Send + 'static,
    {
        self.then_or_else(on_resolved, Err)
    }

    /// Maps the resolved value.
    pub fn map<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
    {
        self.then(move |value| Ok(f(value)))
    }

    /// Continues with a promise-returning callback, flattening the result.
    pub fn and_then<R, F>(&self, f: F) -> Promise<R>
    where
        R: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Promise<R> + Send + 'static,
    {
        let (child, resolver) = self.derive();
        self.on_settled(move |outcome| match outcome {
            Ok(value) => {
                let inner = f(value.clone());
                let cancel_inner = inner.clone();
                resolver.on_cancel(move || {
                    cancel_inner.cancel();
                });
                inner.on_settled(move |inner_outcome| {
                    resolver.settle(inner_outcome.clone());
                });
            }
            Err(e) => {
                resolver.reject(e.clone());
            }
        });
        child
    }

    /// Recovers from a rejection. Never invoked for cancellation.
    pub fn catch<F>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(DispatchError) -> DispatchResult<T> + Send + 'static,
    {
        self.then_or_else(Ok, on_rejected)
    }

    /// Runs `action` on settlement and preserves the original outcome.
    pub fn finally<F>(&self, action: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (child, resolver) = self.derive();
        self.on_settled(move |outcome| {
            action();
            resolver.settle(outcome.clone());
        });
        child
    }

    /// Widens the promise to an untyped payload.
    pub fn erase(&self) -> Promise<AnyValue> {
        self.map(|value| Arc::new(value) as AnyValue)
    }

    /// Blocks the current thread until the promise settles.
    ///
    /// Do not call from inside an async task; await the promise instead.
    pub fn wait(&self) -> DispatchResult<T> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = &state.outcome {
                return outcome.clone();
            }
            self.shared.settled.wait(&mut state);
        }
    }

    /// Blocks up to `timeout`, returning `None` if still pending.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<DispatchResult<T>> {
        let mut state = self.shared.state.lock();
        if state.outcome.is_none() {
            self.shared.settled.wait_for(&mut state, timeout);
        }
        state.outcome.clone()
    }
}

impl Promise<AnyValue> {
    /// Narrows an untyped promise, rejecting with
    /// [`DispatchError::TypeMismatch`] if the payload is not a `T`.
    pub fn downcast<T: Clone + Send + Sync + 'static>(&self) -> Promise<T> {
        self.then(|value| crate::foundation::downcast::<T>(&value))
    }
}

impl<T: Clone + Send + Sync + 'static> Future for Promise<T> {
    type Output = DispatchResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.shared.state.lock();
        if let Some(outcome) = &state.outcome {
            return Poll::Ready(outcome.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

impl<T: Clone + Send + Sync + 'static> std::fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Promise")
            .field("state", &self.state())
            .field("mode", &self.shared.mode)
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Resolver
// =============================================================================

/// Write side of a [`Promise`]. Only the first settlement takes effect.
pub struct Resolver<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Resolver<T> {
    /// Resolves with `value`. Returns `false` if already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.shared.settle(Ok(value))
    }

    /// Rejects with `error`. Returns `false` if already settled.
    pub fn reject(&self, error: DispatchError) -> bool {
        self.shared.settle(Err(error))
    }

    /// Settles with `outcome`. Returns `false` if already settled.
    pub fn settle(&self, outcome: DispatchResult<T>) -> bool {
        self.shared.settle(outcome)
    }

    /// Registers `hook` to run when the promise is cancelled.
    ///
    /// Runs immediately if the promise is already cancelled and is dropped
    /// once the promise settles any other way.
    pub fn on_cancel<F>(&self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.on_cancel(Box::new(hook));
    }

    /// Returns `true` until the promise settles.
    pub fn is_pending(&self) -> bool {
        self.shared.state.lock().outcome.is_none()
    }

    /// A read handle for the promise this resolver settles.
    pub fn promise(&self) -> Promise<T> {
        Promise {
            shared: self.shared.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Resolver<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolver").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_pending, assert_ready};

    #[test]
    fn test_first_settlement_wins() {
        let (promise, resolver) = Promise::<u32>::pending();
        assert!(resolver.resolve(1));
        assert!(!resolver.resolve(2));
        assert!(!resolver.reject(DispatchError::custom("late")));
        assert!(!promise.cancel());
        assert_eq!(promise.state(), PromiseState::Resolved);
        assert_eq!(promise.wait().unwrap(), 1);
    }

    #[test]
    fn test_executor_error_rejects() {
        let promise = Promise::<u32>::new(|_| Err(DispatchError::custom("bad")));
        assert_eq!(promise.state(), PromiseState::Rejected);
    }

    #[test]
    fn test_then_chains_values() {
        let (promise, resolver) = Promise::<u32>::pending();
        let chained = promise.then(|v| Ok(v + 1)).map(|v| v * 10);
        assert!(chained.is_pending());
        resolver.resolve(4);
        assert_eq!(chained.wait().unwrap(), 50);
    }

    #[test]
    fn test_listener_after_settlement_runs_immediately() {
        let promise = Promise::resolved(7u32);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        promise.on_settled(move |outcome| {
            seen_clone.store(*outcome.as_ref().unwrap() as usize, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_catch_recovers_but_ignores_cancellation() {
        let recovered = Promise::<u32>::rejected(DispatchError::custom("x")).catch(|_| Ok(0));
        assert_eq!(recovered.wait().unwrap(), 0);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let (promise, _resolver) = Promise::<u32>::pending();
        let caught = promise.catch(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        });
        promise.cancel();
        assert_eq!(caught.state(), PromiseState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_finally_preserves_outcome() {
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = ran.clone();
        let promise = Promise::<u32>::rejected(DispatchError::custom("boom")).finally(move || {
            ran_clone.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(promise.state(), PromiseState::Rejected);
    }

    #[test]
    fn test_cancel_runs_hooks_and_propagates_to_source() {
        let hooks = Arc::new(AtomicUsize::new(0));
        let (source, resolver) = Promise::<u32>::with_mode(CancelMode::Any);
        let hooks_clone = hooks.clone();
        resolver.on_cancel(move || {
            hooks_clone.fetch_add(1, Ordering::SeqCst);
        });

        let derived = source.then(|v| Ok(v + 1));
        assert!(derived.cancel());
        assert_eq!(source.state(), PromiseState::Cancelled);
        assert_eq!(hooks.load(Ordering::SeqCst), 1);
        assert!(!resolver.resolve(3));
    }

    #[test]
    fn test_cancel_mode_all_waits_for_every_child() {
        let (source, _resolver) = Promise::<u32>::pending();
        let first = source.map(|v| v);
        let second = source.map(|v| v);

        first.cancel();
        assert!(source.is_pending());
        second.cancel();
        assert_eq!(source.state(), PromiseState::Cancelled);
    }

    #[test]
    fn test_and_then_flattens() {
        let (inner, inner_resolver) = Promise::<u32>::pending();
        let outer = Promise::resolved(2u32).and_then(move |v| inner.map(move |i| i * v));
        assert!(outer.is_pending());
        inner_resolver.resolve(21);
        assert_eq!(outer.wait().unwrap(), 42);
    }

    #[test]
    fn test_erase_and_downcast() {
        let erased = Promise::resolved(String::from("hi")).erase();
        assert_eq!(erased.downcast::<String>().wait().unwrap(), "hi");
        assert!(matches!(
            erased.downcast::<u32>().wait(),
            Err(DispatchError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_poll_registers_waker() {
        let (promise, resolver) = Promise::<u32>::pending();
        let mut task = tokio_test::task::spawn(promise);
        assert_pending!(task.poll());
        resolver.resolve(5);
        assert!(task.is_woken());
        assert_eq!(assert_ready!(task.poll()).unwrap(), 5);
    }

    #[tokio::test]
    async fn test_await_resolved_from_task() {
        let (promise, resolver) = Promise::<u32>::pending();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            resolver.resolve(9);
        });
        assert_eq!(promise.await.unwrap(), 9);
    }

    #[test]
    fn test_wait_timeout_on_pending() {
        let (promise, _resolver) = Promise::<u32>::pending();
        assert!(promise.wait_timeout(Duration::from_millis(5)).is_none());
    }
}
