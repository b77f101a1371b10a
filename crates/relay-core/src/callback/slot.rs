//! Result slot shared by the built-in callbacks.

use parking_lot::Mutex;

use super::Response;
use crate::foundation::AnyValue;
use crate::promise::Promise;

/// Collected responses plus a cached aggregate of their values.
pub(super) struct Slot {
    many: bool,
    state: Mutex<SlotState>,
}

#[derive(Default)]
struct SlotState {
    responses: Vec<Response>,
    aggregate: Option<Promise<Vec<AnyValue>>>,
}

impl Slot {
    pub(super) fn new(many: bool) -> Self {
        Self {
            many,
            state: Mutex::new(SlotState::default()),
        }
    }

    pub(super) fn is_many(&self) -> bool {
        self.many
    }

    /// First response wins unless the slot collects many.
    pub(super) fn offer(&self, response: Response) -> bool {
        let mut state = self.state.lock();
        if !self.many && !state.responses.is_empty() {
            return false;
        }
        state.responses.push(response);
        state.aggregate = None;
        true
    }

    pub(super) fn responses(&self) -> Vec<Response> {
        self.state.lock().responses.clone()
    }

    pub(super) fn first(&self) -> Option<Response> {
        self.state.lock().responses.first().cloned()
    }

    pub(super) fn len(&self) -> usize {
        self.state.lock().responses.len()
    }

    pub(super) fn is_async(&self) -> bool {
        self.state.lock().responses.iter().any(Response::is_pending)
    }

    /// Every response's value, in response order.
    ///
    /// The aggregate is cached until the next response arrives, so every
    /// caller observes (and may cancel) the same promise.
    pub(super) fn values(&self) -> Promise<Vec<AnyValue>> {
        let mut state = self.state.lock();
        if let Some(aggregate) = &state.aggregate {
            return aggregate.clone();
        }
        let aggregate = Promise::all(state.responses.iter().cloned().map(Response::into_promise));
        state.aggregate = Some(aggregate.clone());
        aggregate
    }

    pub(super) fn pending(&self) -> Option<Promise<AnyValue>> {
        if !self.is_async() {
            return None;
        }
        if self.many {
            return Some(self.values().erase());
        }
        match self.first() {
            Some(Response::Pending(promise)) => Some(promise),
            _ => None,
        }
    }
}
