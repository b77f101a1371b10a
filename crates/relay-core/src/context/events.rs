//! Lifecycle events of a context.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::Context;

/// Why a context ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// [`Context::end`] was called.
    Requested,
    /// An ancestor ended or unwound its children.
    Unwound,
    /// The last handle was dropped while the context was active.
    Disposed,
    /// Delivered to listeners subscribing after the moment they wait for.
    AlreadyEnded,
    /// Application-defined reason.
    Custom(Arc<str>),
}

impl EndReason {
    /// An application-defined reason.
    pub fn custom(reason: impl Into<Arc<str>>) -> Self {
        Self::Custom(reason.into())
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Requested => f.write_str("requested"),
            Self::Unwound => f.write_str("unwound"),
            Self::Disposed => f.write_str("disposed"),
            Self::AlreadyEnded => f.write_str("already ended"),
            Self::Custom(reason) => f.write_str(reason),
        }
    }
}

/// Receives the context the event is about and the reason it is ending.
///
/// Child events pass the child context.
pub type Listener = Arc<dyn Fn(&Context, &EndReason) + Send + Sync>;

/// Handle for removing a listener with [`Context::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// The moment a listener waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Phase {
    Ending,
    Ended,
    ChildEnding,
    ChildEnded,
}

/// Listener registry of one context.
pub(super) struct Events {
    next: AtomicU64,
    listeners: Mutex<Vec<(SubscriptionId, Phase, Listener)>>,
}

impl Events {
    pub(super) fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// An id no listener is registered under.
    pub(super) fn detached(&self) -> SubscriptionId {
        SubscriptionId(self.next.fetch_add(1, Ordering::Relaxed))
    }

    pub(super) fn subscribe(&self, phase: Phase, listener: Listener) -> SubscriptionId {
        let id = self.detached();
        self.listeners.lock().push((id, phase, listener));
        id
    }

    pub(super) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _, _)| *existing != id);
        listeners.len() != before
    }

    /// Calls every listener for `phase`, outside the registry lock.
    pub(super) fn raise(&self, phase: Phase, context: &Context, reason: &EndReason) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .filter(|(_, p, _)| *p == phase)
            .map(|(_, _, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(context, reason);
        }
    }

    pub(super) fn clear(&self) {
        self.listeners.lock().clear();
    }

    pub(super) fn len(&self) -> usize {
        self.listeners.lock().len()
    }
}
