//! Context trees: hierarchical, disposable scopes of handlers.
//!
//! A [`Context`] is a handler holding its own handler list, a parent and
//! children. Dispatch tries the local handlers first and falls back to the
//! parent chain; [`Context::axis`] scopes dispatch to other parts of the
//! tree instead.
//!
//! ```text
//! Active ──end()──▶ Ending ──children unwound, token cancelled──▶ Ended
//!                     │                                            │
//!                  on_ending                                    on_ended
//! ```
//!
//! Contexts link to each other weakly in both directions: a child is kept
//! alive only by its callers, and dropping its last handle ends it with
//! [`EndReason::Disposed`]. Dead children are purged from their parent
//! lazily.

mod axis;
mod events;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::callback::{Callback, Command};
use crate::foundation::{DispatchError, DispatchResult, Payload, Typed};
use crate::graph::{Axis, Traversing, traverse};
use crate::handler::{
    CompositeHandler, Handler, HandlerExt, HandlerRef, HandlerRefExt, Leaf, Provider,
};
use crate::promise::Promise;

pub use axis::AxisHandler;
pub use events::{EndReason, Listener, SubscriptionId};

use events::{Events, Phase};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

impl ContextId {
    fn next() -> Self {
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ctx#{}", self.0)
    }
}

/// Lifecycle state of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Accepting children and dispatch.
    Active,
    /// Tearing down.
    Ending,
    /// Terminal.
    Ended,
}

/// A node of a context tree.
pub struct Context {
    id: ContextId,
    this: Weak<Context>,
    parent: Option<Weak<Context>>,
    children: RwLock<BTreeMap<ContextId, Weak<Context>>>,
    handlers: CompositeHandler,
    state: Mutex<ContextState>,
    events: Events,
    token: CancellationToken,
}

impl Context {
    /// Creates a root context.
    pub fn new() -> Arc<Self> {
        Self::build(None, CancellationToken::new())
    }

    /// Creates a root context with `handlers`.
    pub fn with_handlers(handlers: impl IntoIterator<Item = HandlerRef>) -> Arc<Self> {
        let context = Self::new();
        context.add_handlers(handlers);
        context
    }

    fn build(parent: Option<Weak<Context>>, token: CancellationToken) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            id: ContextId::next(),
            this: this.clone(),
            parent,
            children: RwLock::new(BTreeMap::new()),
            handlers: CompositeHandler::new(),
            state: Mutex::new(ContextState::Active),
            events: Events::new(),
            token,
        })
    }

    /// This context's identity.
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ContextState {
        *self.state.lock()
    }

    /// Returns `true` while the context is [`ContextState::Active`].
    pub fn is_active(&self) -> bool {
        self.state() == ContextState::Active
    }

    /// The parent context, if this is not a root and the parent is alive.
    pub fn parent(&self) -> Option<Arc<Context>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// The root of this context's tree.
    pub fn root(self: &Arc<Self>) -> Arc<Context> {
        let mut root = self.clone();
        while let Some(parent) = root.parent() {
            root = parent;
        }
        root
    }

    /// Live children, in creation order.
    pub fn children(&self) -> Vec<Arc<Context>> {
        let mut children = self.children.write();
        children.retain(|_, child| child.strong_count() > 0);
        children.values().filter_map(Weak::upgrade).collect()
    }

    /// Returns `true` if the context has live children.
    pub fn has_children(&self) -> bool {
        let mut children = self.children.write();
        children.retain(|_, child| child.strong_count() > 0);
        !children.is_empty()
    }

    /// A token cancelled when the context ends.
    ///
    /// Children's tokens are child tokens of their parent's.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Creates a child context.
    ///
    /// Fails with [`DispatchError::ContextEnded`] unless the context is active.
    pub fn create_child(&self) -> DispatchResult<Arc<Context>> {
        let state = self.state.lock();
        if *state != ContextState::Active {
            return Err(DispatchError::ContextEnded);
        }
        let child = Self::build(Some(self.this.clone()), self.token.child_token());
        self.children.write().insert(child.id, Arc::downgrade(&child));
        drop(state);
        debug!(parent = %self.id, child = %child.id, "created child context");
        Ok(child)
    }

    // =========================================================================
    // Handlers
    // =========================================================================

    /// Appends handlers.
    pub fn add_handlers(&self, handlers: impl IntoIterator<Item = HandlerRef>) -> &Self {
        self.handlers.add(handlers);
        self
    }

    /// Inserts handlers at `index`.
    pub fn insert_handlers(
        &self,
        index: usize,
        handlers: impl IntoIterator<Item = HandlerRef>,
    ) -> &Self {
        self.handlers.insert(index, handlers);
        self
    }

    /// Removes handlers, compared by identity.
    pub fn remove_handlers(&self, handlers: &[HandlerRef]) -> &Self {
        self.handlers.remove(handlers);
        self
    }

    /// The local handlers.
    pub fn handlers(&self) -> Vec<HandlerRef> {
        self.handlers.handlers()
    }

    /// Exposes `value` to inquiries for its type.
    pub fn store<T: Typed + Clone>(&self, value: T) -> &Self {
        self.add_handlers([Leaf::new(Provider::new(value)).into_ref()])
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches along `axis`.
    ///
    /// [`Axis::Itself`] uses only the local handlers. Other axes walk the
    /// tree and dispatch to each node's local handlers, stopping at the
    /// first success unless `greedy`.
    pub fn handle_axis(
        &self,
        axis: Axis,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        let this = match (axis, self.this.upgrade()) {
            (Axis::Itself, _) | (_, None) => {
                return self.handlers.handle_callback(callback, greedy, composer);
            }
            (_, Some(this)) => this,
        };

        let mut handled = false;
        let mut failure = None;
        traverse(&this, axis, |node| {
            match node.handle_axis(Axis::Itself, callback, greedy, composer) {
                Ok(result) => {
                    handled |= result;
                    handled && !greedy
                }
                Err(e) => {
                    failure = Some(e);
                    true
                }
            }
        })?;
        match failure {
            Some(e) => Err(e),
            None => Ok(handled),
        }
    }

    /// A handler dispatching from this context along `axis`.
    pub fn axis(self: &Arc<Self>, axis: Axis) -> HandlerRef {
        Arc::new(AxisHandler::new(self.clone(), axis))
    }

    /// Notifies this context and every descendant of `payload`.
    pub fn publish(self: &Arc<Self>, payload: impl Payload + 'static) -> DispatchResult<bool> {
        self.axis(Axis::SelfOrDescendant)
            .notify()
            .handle(&Command::new(payload))
    }

    /// Cancels `promise` when the context ends.
    ///
    /// A promise tracked by a context that is no longer active is cancelled
    /// immediately.
    pub fn track<T: Clone + Send + Sync + 'static>(&self, promise: &Promise<T>) {
        if !promise.is_pending() {
            return;
        }
        let target = promise.clone();
        let id = self.on_ending(move |context, _| {
            trace!(context = %context.id(), "cancelling tracked promise");
            target.cancel_with("context ended");
        });
        let owner = self.this.clone();
        promise.on_settled(move |_| {
            if let Some(context) = owner.upgrade() {
                context.unsubscribe(id);
            }
        });
    }

    /// This context as a handler that tracks every pending result produced
    /// through it.
    pub fn track_promises(self: &Arc<Self>) -> HandlerRef {
        let tracker = self.this.clone();
        let handler: HandlerRef = self.clone();
        handler.intercept(move |callback, proceed| {
            let handled = proceed()?;
            if let Some(context) = tracker.upgrade()
                && let Some(pending) = callback.pending()
            {
                context.track(&pending);
            }
            Ok(handled)
        })
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Ends the context with [`EndReason::Requested`].
    pub fn end(&self) -> bool {
        self.end_with(EndReason::Requested)
    }

    /// Ends the context.
    ///
    /// Raises `ending`, ends every child with [`EndReason::Unwound`],
    /// cancels the context's token, raises `ended` and drops every listener.
    /// Returns `false` if the context was not active.
    pub fn end_with(&self, reason: EndReason) -> bool {
        {
            let mut state = self.state.lock();
            if *state != ContextState::Active {
                return false;
            }
            *state = ContextState::Ending;
        }
        debug!(context = %self.id, %reason, "context ending");
        self.events.raise(Phase::Ending, self, &reason);
        let parent = self.parent();
        if let Some(parent) = &parent {
            parent.events.raise(Phase::ChildEnding, self, &reason);
        }

        self.unwind();
        self.token.cancel();

        *self.state.lock() = ContextState::Ended;
        self.events.raise(Phase::Ended, self, &reason);
        if let Some(parent) = &parent {
            parent.events.raise(Phase::ChildEnded, self, &reason);
            parent.children.write().remove(&self.id);
        }
        self.events.clear();
        self.children.write().clear();
        debug!(context = %self.id, "context ended");
        true
    }

    /// Ends every child with [`EndReason::Unwound`].
    pub fn unwind(&self) -> &Self {
        for child in self.children() {
            child.end_with(EndReason::Unwound);
        }
        self
    }

    /// Unwinds the whole tree below the root and returns the root.
    pub fn unwind_to_root(self: &Arc<Self>) -> Arc<Context> {
        let root = self.root();
        root.unwind();
        root
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Runs `listener` when the context starts ending.
    ///
    /// If it already has, `listener` runs immediately with
    /// [`EndReason::AlreadyEnded`].
    pub fn on_ending<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Context, &EndReason) + Send + Sync + 'static,
    {
        {
            let state = self.state.lock();
            if *state == ContextState::Active {
                return self.events.subscribe(Phase::Ending, Arc::new(listener));
            }
        }
        listener(self, &EndReason::AlreadyEnded);
        self.events.detached()
    }

    /// Runs `listener` once the context has ended.
    ///
    /// If it already has, `listener` runs immediately with
    /// [`EndReason::AlreadyEnded`].
    pub fn on_ended<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Context, &EndReason) + Send + Sync + 'static,
    {
        {
            let state = self.state.lock();
            if *state != ContextState::Ended {
                return self.events.subscribe(Phase::Ended, Arc::new(listener));
            }
        }
        listener(self, &EndReason::AlreadyEnded);
        self.events.detached()
    }

    /// Runs `listener` with each child that starts ending.
    pub fn on_child_ending<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Context, &EndReason) + Send + Sync + 'static,
    {
        self.events.subscribe(Phase::ChildEnding, Arc::new(listener))
    }

    /// Runs `listener` with each child that has ended.
    pub fn on_child_ended<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&Context, &EndReason) + Send + Sync + 'static,
    {
        self.events.subscribe(Phase::ChildEnded, Arc::new(listener))
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.events.unsubscribe(id)
    }
}

impl Handler for Context {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        if self.state() == ContextState::Ended {
            trace!(context = %self.id, "ended context skipped");
            return Ok(false);
        }
        let mut handled = self.handlers.handle_callback(callback, greedy, composer)?;
        if (!handled || greedy)
            && let Some(parent) = self.parent()
        {
            handled |= parent.handle_callback(callback, greedy, composer)?;
        }
        Ok(handled)
    }
}

impl Traversing for Arc<Context> {
    type Id = ContextId;

    fn node_id(&self) -> ContextId {
        self.id
    }

    fn parent(&self) -> Option<Self> {
        Context::parent(self)
    }

    fn children(&self) -> Vec<Self> {
        Context::children(self)
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.end_with(EndReason::Disposed);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("children", &self.children.read().len())
            .field("handlers", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Response;
    use crate::foundation::AnyValue;
    use crate::policy::{Describe, DescriptorBuilder, Invocation};
    use crate::promise::{PromiseState, Resolver};
    use std::sync::atomic::AtomicUsize;

    struct Job;
    impl Typed for Job {}

    struct Ping;
    impl Typed for Ping {}

    /// Answers jobs with promises it resolves later.
    struct Worker {
        methods: usize,
        pending: Arc<Mutex<Vec<Resolver<u32>>>>,
    }

    impl Worker {
        fn start(&self) -> Promise<u32> {
            let (promise, resolver) = Promise::pending();
            self.pending.lock().push(resolver);
            promise
        }
    }

    impl Describe for Worker {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|w: &Self, _: &Job, _: &Invocation<'_>| w.start());
            d.handles_key(crate::foundation::TypeKey::any(), |w: &Self, _, _| {
                (w.methods > 1).then(|| w.start())
            });
        }
    }

    struct Counter {
        hits: Arc<AtomicUsize>,
    }

    impl Describe for Counter {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|c: &Self, _: &Ping, _: &Invocation<'_>| {
                c.hits.fetch_add(1, Ordering::SeqCst);
            });
        }
    }

    fn counter(hits: &Arc<AtomicUsize>) -> HandlerRef {
        Leaf::new(Counter { hits: hits.clone() }).into_ref()
    }

    #[tokio::test]
    async fn test_end_cancels_pending_dispatch() {
        let pending = Arc::new(Mutex::new(Vec::new()));
        let context = Context::with_handlers([
            Leaf::new(Worker {
                methods: 2,
                pending: pending.clone(),
            })
            .into_ref(),
            Leaf::new(Worker {
                methods: 1,
                pending: pending.clone(),
            })
            .into_ref(),
        ]);

        let command = Command::many(Job);
        assert!(context.track_promises().handle_all(&command).unwrap());
        let branches: Vec<Promise<AnyValue>> = command
            .responses()
            .into_iter()
            .map(Response::into_promise)
            .collect();
        assert_eq!(branches.len(), 3);
        let results = command.results();
        assert!(results.is_pending());

        assert!(context.end());
        for branch in &branches {
            assert_eq!(branch.state(), PromiseState::Cancelled);
        }
        assert!(pending.lock().iter().all(|r| !r.is_pending()));
        assert!(results.await.unwrap_err().is_cancelled());
        assert!(matches!(context.create_child(), Err(DispatchError::ContextEnded)));
    }

    #[test]
    fn test_track_on_ended_context_cancels_immediately() {
        let context = Context::new();
        context.end();
        let (promise, _resolver) = Promise::<u32>::pending();
        context.track(&promise);
        assert_eq!(promise.state(), PromiseState::Cancelled);
    }

    #[test]
    fn test_settled_promise_unsubscribes() {
        let context = Context::new();
        let (promise, resolver) = Promise::<u32>::pending();
        context.track(&promise);
        assert_eq!(context.events.len(), 1);
        resolver.resolve(1);
        assert_eq!(context.events.len(), 0);
    }

    #[test]
    fn test_lifecycle_order_and_child_forwarding() {
        let root = Context::new();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        root.on_child_ending(move |c, reason| l.lock().push(format!("child-ending {} {reason}", c.id())));
        let l = log.clone();
        root.on_child_ended(move |c, reason| l.lock().push(format!("child-ended {} {reason}", c.id())));
        let l = log.clone();
        child.on_ending(move |_, _| l.lock().push("ending".to_string()));
        let l = log.clone();
        grandchild.on_ended(move |_, reason| l.lock().push(format!("grandchild {reason}")));
        let l = log.clone();
        child.on_ended(move |_, _| l.lock().push("ended".to_string()));

        let token = grandchild.cancellation_token();
        assert!(child.end());
        assert!(!child.end());
        assert!(token.is_cancelled());
        assert!(!root.cancellation_token().is_cancelled());

        let id = child.id();
        assert_eq!(
            *log.lock(),
            [
                "ending".to_string(),
                format!("child-ending {id} requested"),
                "grandchild unwound".to_string(),
                "ended".to_string(),
                format!("child-ended {id} requested"),
            ]
        );
        assert!(!root.has_children());
        assert_eq!(grandchild.state(), ContextState::Ended);
    }

    #[test]
    fn test_late_subscribers_fire_immediately() {
        let context = Context::new();
        context.end_with(EndReason::custom("shutdown"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        context.on_ending(move |_, reason| s.lock().push(reason.clone()));
        let s = seen.clone();
        context.on_ended(move |_, reason| s.lock().push(reason.clone()));
        assert_eq!(*seen.lock(), [EndReason::AlreadyEnded, EndReason::AlreadyEnded]);
    }

    #[test]
    fn test_dropping_root_disposes_it() {
        let reason = Arc::new(Mutex::new(None));
        let r = reason.clone();
        let context = Context::new();
        context.on_ended(move |_, why| *r.lock() = Some(why.clone()));
        drop(context);
        assert_eq!(*reason.lock(), Some(EndReason::Disposed));
    }

    #[test]
    fn test_dropping_child_disposes_it() {
        let root = Context::new();
        let child = root.create_child().unwrap();
        let grandchild = child.create_child().unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));

        let l = log.clone();
        root.on_child_ending(move |_, reason| l.lock().push(format!("child-ending {reason}")));
        let l = log.clone();
        root.on_child_ended(move |_, reason| l.lock().push(format!("child-ended {reason}")));
        let l = log.clone();
        child.on_ended(move |_, reason| l.lock().push(format!("ended {reason}")));

        let token = child.cancellation_token();
        assert!(root.has_children());
        drop(child);

        assert!(token.is_cancelled());
        assert!(!root.has_children());
        assert!(root.children().is_empty());
        assert_eq!(grandchild.state(), ContextState::Ended);
        assert_eq!(
            *log.lock(),
            [
                "child-ending disposed".to_string(),
                "ended disposed".to_string(),
                "child-ended disposed".to_string(),
            ]
        );
    }

    #[test]
    fn test_dead_children_are_purged() {
        let root = Context::new();
        let kept = root.create_child().unwrap();
        for _ in 0..3 {
            let _ = root.create_child().unwrap();
        }
        let ids: Vec<_> = root.children().iter().map(|c| c.id()).collect();
        assert_eq!(ids, [kept.id()]);
        assert_eq!(root.children.read().len(), 1);
    }

    #[test]
    fn test_dispatch_falls_through_to_parent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let root = Context::with_handlers([counter(&hits)]);
        let child = root.create_child().unwrap();
        assert!(child.handle(&Command::new(Ping)).unwrap());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_axis_scopes_dispatch() {
        let root_hits = Arc::new(AtomicUsize::new(0));
        let child_hits = Arc::new(AtomicUsize::new(0));
        let root = Context::with_handlers([counter(&root_hits)]);
        let a = root.create_child().unwrap();
        let b = root.create_child().unwrap();
        a.add_handlers([counter(&child_hits)]);
        b.add_handlers([counter(&child_hits)]);

        assert!(root.publish(Ping).unwrap());
        assert_eq!(root_hits.load(Ordering::SeqCst), 1);
        assert_eq!(child_hits.load(Ordering::SeqCst), 2);

        assert!(root.axis(Axis::Child).handle(&Command::new(Ping)).unwrap());
        assert_eq!(child_hits.load(Ordering::SeqCst), 3);
        assert_eq!(root_hits.load(Ordering::SeqCst), 1);

        let err = a.axis(Axis::Sibling).handle(&Command::new(Job));
        assert!(err.unwrap_err().is_not_handled());
    }

    #[test]
    fn test_store_exposes_data() {
        #[derive(Clone, Debug, PartialEq)]
        struct Tenant(&'static str);
        impl Typed for Tenant {}

        let root = Context::new();
        root.store(Tenant("acme"));
        let child = root.create_child().unwrap();
        assert_eq!(child.resolve::<Tenant>().unwrap(), Some(Tenant("acme")));
        assert_eq!(child.root().id(), root.id());
        assert_eq!(child.unwind_to_root().id(), root.id());
        assert!(!root.has_children());
    }

    #[test]
    fn test_handler_list_changes() {
        let hits = Arc::new(AtomicUsize::new(0));
        let first = counter(&hits);
        let context = Context::new();
        context.add_handlers([first.clone()]);
        context.insert_handlers(0, [counter(&hits)]);
        assert_eq!(context.handlers().len(), 2);
        context.remove_handlers(&[first]);
        assert_eq!(context.handlers().len(), 1);
    }
}
