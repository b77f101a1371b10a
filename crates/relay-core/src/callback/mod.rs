//! Callbacks: the units of work routed to handlers.
//!
//! A callback names the [`Policy`] that routes it and offers a result slot
//! through [`Callback::respond`]. Two general-purpose callbacks are built in:
//!
//! - [`Command`] carries a payload to methods registered under
//!   [`Policy::handles`] (contravariant on the payload type)
//! - [`Inquiry`] asks methods registered under [`Policy::provides`] for a
//!   value of a key (covariant on the result type)
//! - [`HandleMethod`] calls a protocol method registered under
//!   [`Policy::handles_method`]
//!
//! [`Options`] callbacks are answered by decorators rather than methods and
//! carry per-call settings such as [`CallbackSemantics`] and
//! [`FilterOptions`].

mod command;
mod inquiry;
mod method;
mod options;
mod slot;

use crate::foundation::{AnyValue, AsAny};
use crate::policy::Policy;
use crate::promise::Promise;

pub use command::Command;
pub use inquiry::Inquiry;
pub use method::HandleMethod;
pub use options::{CallbackOptions, CallbackSemantics, FilterOptions, Mergeable, Options};

/// A result offered to a callback's result slot.
#[derive(Debug, Clone)]
pub enum Response {
    /// A value available now.
    Value(AnyValue),
    /// A value still being produced.
    Pending(Promise<AnyValue>),
}

impl Response {
    /// Lifts the response into a promise.
    pub fn into_promise(self) -> Promise<AnyValue> {
        match self {
            Self::Value(value) => Promise::resolved(value),
            Self::Pending(promise) => promise,
        }
    }

    /// Returns `true` if the value is still being produced.
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(p) if p.is_pending())
    }
}

/// Any value that can be dispatched to a handler.
pub trait Callback: AsAny + Send + Sync {
    /// The policy that routes this callback.
    fn policy(&self) -> &Policy;

    /// Offers a method's result. Returns `false` to refuse it, in which case
    /// the method is not counted as having handled the callback.
    fn respond(&self, response: Response) -> bool {
        let _ = response;
        true
    }

    /// The asynchronous result accumulated so far, if any is pending.
    fn pending(&self) -> Option<Promise<AnyValue>> {
        None
    }

    /// Short description used in logs and errors.
    fn describe(&self) -> String {
        self.type_name().to_string()
    }
}

impl<'a> dyn Callback + 'a {
    /// Downcasts to a concrete callback type.
    pub fn downcast_ref<C: Callback + 'static>(&self) -> Option<&C> {
        self.as_any().downcast_ref::<C>()
    }
}
