use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use super::{Handler, HandlerRef};
use crate::callback::Callback;
use crate::foundation::DispatchResult;

/// An ordered, mutable list of handlers tried in turn.
///
/// Dispatch works on a snapshot of the list, so handlers may be added or
/// removed while a dispatch is in flight.
#[derive(Default)]
pub struct CompositeHandler {
    handlers: RwLock<Vec<HandlerRef>>,
}

impl CompositeHandler {
    /// An empty composite.
    pub fn new() -> Self {
        Self::default()
    }

    /// A composite over `handlers`.
    pub fn from_handlers(handlers: impl IntoIterator<Item = HandlerRef>) -> Self {
        Self {
            handlers: RwLock::new(handlers.into_iter().collect()),
        }
    }

    /// Appends handlers not already present.
    pub fn add(&self, handlers: impl IntoIterator<Item = HandlerRef>) -> &Self {
        let mut list = self.handlers.write();
        for handler in handlers {
            if !contains(&list, &handler) {
                list.push(handler);
            }
        }
        self
    }

    /// Inserts handlers not already present at `index`, clamped to the end.
    pub fn insert(&self, index: usize, handlers: impl IntoIterator<Item = HandlerRef>) -> &Self {
        let mut list = self.handlers.write();
        let mut at = index.min(list.len());
        for handler in handlers {
            if !contains(&list, &handler) {
                list.insert(at, handler);
                at += 1;
            }
        }
        self
    }

    /// Removes the given handlers, compared by identity.
    pub fn remove(&self, handlers: &[HandlerRef]) -> &Self {
        self.handlers
            .write()
            .retain(|h| !handlers.iter().any(|r| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(r))));
        self
    }

    /// A copy of the current handler list.
    pub fn handlers(&self) -> Vec<HandlerRef> {
        self.handlers.read().clone()
    }

    /// Number of handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Returns `true` if there are no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

fn contains(list: &[HandlerRef], handler: &HandlerRef) -> bool {
    list.iter()
        .any(|h| std::ptr::addr_eq(Arc::as_ptr(h), Arc::as_ptr(handler)))
}

impl Handler for CompositeHandler {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        let snapshot = self.handlers();
        let mut handled = false;
        for (index, handler) in snapshot.iter().enumerate() {
            if handler.handle_callback(callback, greedy, composer)? {
                handled = true;
                if !greedy {
                    trace!(index, "composite child handled callback");
                    break;
                }
            }
        }
        Ok(handled)
    }
}

impl std::fmt::Debug for CompositeHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompositeHandler")
            .field("handlers", &self.len())
            .finish()
    }
}

/// Two handlers tried in order.
pub struct Cascade {
    first: HandlerRef,
    second: HandlerRef,
}

impl Cascade {
    /// Tries `first`, then `second`.
    pub fn new(first: HandlerRef, second: HandlerRef) -> Self {
        Self { first, second }
    }
}

impl Handler for Cascade {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        let handled = self.first.handle_callback(callback, greedy, composer)?;
        if handled && !greedy {
            return Ok(true);
        }
        Ok(self.second.handle_callback(callback, greedy, composer)? || handled)
    }
}

impl std::fmt::Debug for Cascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cascade").finish_non_exhaustive()
    }
}

/// Chains `first` with `rest`: unchanged when `rest` is empty, a
/// [`Cascade`] for one more handler, a [`CompositeHandler`] otherwise.
pub fn chain(first: HandlerRef, rest: impl IntoIterator<Item = HandlerRef>) -> HandlerRef {
    let mut rest: Vec<HandlerRef> = rest.into_iter().collect();
    match rest.len() {
        0 => first,
        1 => match rest.pop() {
            Some(second) => Arc::new(Cascade::new(first, second)),
            None => first,
        },
        _ => {
            rest.insert(0, first);
            Arc::new(CompositeHandler::from_handlers(rest))
        }
    }
}
