//! Invoking matched methods.

use std::any::Any;
use std::sync::Arc;

use tracing::{debug, trace};

use super::definition::Policy;
use super::descriptor::{Candidate, HandlerDescriptor, MethodDescriptor};
use crate::callback::{Callback, Command, Response};
use crate::filter;
use crate::foundation::{AnyValue, Bindings, DispatchError, DispatchResult, Payload};
use crate::handler::Handler;
use crate::promise::Promise;

/// What a method (or a filter) produced.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Handled without a value.
    Done,
    /// Handled with a value.
    Value(AnyValue),
    /// Handled; the value will arrive later.
    Pending(Promise<AnyValue>),
    /// Declined; the method does not count as having handled the callback.
    Skip,
}

impl Reply {
    /// A reply carrying `value`.
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Self::Value(Arc::new(value))
    }

    /// A reply carrying a typed promise.
    pub fn pending<T: Clone + Send + Sync + 'static>(promise: Promise<T>) -> Self {
        Self::Pending(promise.erase())
    }

    /// Returns `true` if the method declined.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::Skip)
    }

    /// The value-bearing part of the reply.
    pub fn into_response(self) -> Option<Response> {
        match self {
            Self::Value(value) => Some(Response::Value(value)),
            Self::Pending(promise) => Some(Response::Pending(promise)),
            Self::Done | Self::Skip => None,
        }
    }

    /// Lifts the reply into a promise of its optional value.
    pub fn into_promise(self) -> Promise<Option<AnyValue>> {
        match self {
            Self::Value(value) => Promise::resolved(Some(value)),
            Self::Pending(promise) => promise.map(Some),
            Self::Done | Self::Skip => Promise::resolved(None),
        }
    }
}

/// Conversion of method return values into a [`Reply`].
pub trait IntoReply {
    /// Converts `self`.
    fn into_reply(self) -> DispatchResult<Reply>;
}

impl IntoReply for () {
    fn into_reply(self) -> DispatchResult<Reply> {
        Ok(Reply::Done)
    }
}

impl IntoReply for Reply {
    fn into_reply(self) -> DispatchResult<Reply> {
        Ok(self)
    }
}

impl<T: Clone + Send + Sync + 'static> IntoReply for Promise<T> {
    fn into_reply(self) -> DispatchResult<Reply> {
        Ok(Reply::pending(self))
    }
}

impl<R: IntoReply> IntoReply for Option<R> {
    fn into_reply(self) -> DispatchResult<Reply> {
        self.map_or(Ok(Reply::Skip), IntoReply::into_reply)
    }
}

impl<R: IntoReply, E: Into<DispatchError>> IntoReply for Result<R, E> {
    fn into_reply(self) -> DispatchResult<Reply> {
        self.map_err(Into::into)?.into_reply()
    }
}

/// Everything a method sees besides its handler.
pub struct Invocation<'a> {
    callback: &'a dyn Callback,
    composer: &'a dyn Handler,
    bindings: &'a Bindings,
    method: &'a MethodDescriptor,
}

impl<'a> Invocation<'a> {
    /// Creates an invocation of `method` for `callback`.
    pub fn new(
        callback: &'a dyn Callback,
        composer: &'a dyn Handler,
        bindings: &'a Bindings,
        method: &'a MethodDescriptor,
    ) -> Self {
        Self {
            callback,
            composer,
            bindings,
            method,
        }
    }

    /// The callback being serviced.
    pub fn callback(&self) -> &'a dyn Callback {
        self.callback
    }

    /// The outermost handler of the dispatch, for follow-up callbacks.
    pub fn composer(&self) -> &'a dyn Handler {
        self.composer
    }

    /// Generic parameters bound when the method was matched.
    pub fn bindings(&self) -> &'a Bindings {
        self.bindings
    }

    /// The method being invoked.
    pub fn method(&self) -> &'a MethodDescriptor {
        self.method
    }

    /// The payload when the callback is a [`Command`].
    pub fn payload(&self) -> Option<&'a dyn Payload> {
        self.callback.downcast_ref::<Command>().map(Command::payload)
    }
}

/// Dispatches `callback` to the methods of one handler instance.
///
/// Candidates run best first. Non-greedy dispatch stops at the first method
/// that handles the callback.
pub fn dispatch(
    policy: &Policy,
    target: &dyn Any,
    descriptor: &HandlerDescriptor,
    callback: &dyn Callback,
    greedy: bool,
    composer: &dyn Handler,
) -> DispatchResult<bool> {
    let Some(key) = policy.key_of(callback) else {
        return Ok(false);
    };
    let candidates = descriptor.candidates(policy, &key);
    let mut dispatched = false;
    for candidate in candidates.iter() {
        if !policy.approves(callback, &candidate.method) || !candidate.method.approves(callback) {
            trace!(method = candidate.method.name(), "method not approved");
            continue;
        }
        if invoke(policy, target, descriptor, candidate, callback, composer)? {
            dispatched = true;
            if !greedy {
                break;
            }
        }
    }
    Ok(dispatched)
}

fn invoke(
    policy: &Policy,
    target: &dyn Any,
    descriptor: &HandlerDescriptor,
    candidate: &Candidate,
    callback: &dyn Callback,
    composer: &dyn Handler,
) -> DispatchResult<bool> {
    let method = &*candidate.method;
    let filters = filter::assemble(policy, descriptor, method, callback, composer)?;
    trace!(
        handler = descriptor.name(),
        method = method.name(),
        accuracy = candidate.accuracy,
        filters = filters.len(),
        "invoking method"
    );

    let terminal = |callback: &dyn Callback, composer: &dyn Handler| {
        method.invoke(
            target,
            &Invocation::new(callback, composer, &candidate.bindings, method),
        )
    };
    let reply = filter::invoke(callback, method, composer, &filters, &terminal)
        .map_err(|e| e.in_method(method.name()))?;

    Ok(match reply {
        Reply::Skip => false,
        Reply::Done => true,
        reply => match reply.into_response() {
            Some(response) => {
                let accepted = callback.respond(response);
                if !accepted {
                    debug!(method = method.name(), "result refused by callback");
                }
                accepted
            }
            None => true,
        },
    })
}
