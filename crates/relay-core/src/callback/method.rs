use std::any::Any;
use std::sync::Arc;

use super::slot::Slot;
use super::{Callback, Response};
use crate::foundation::{AnyValue, TypeKey, Typed};
use crate::policy::Policy;
use crate::promise::Promise;

/// A call of a protocol method, routed under [`Policy::handles_method`].
///
/// Protocols are [`Typed`] marker types; methods are declared for them with
/// [`DescriptorBuilder::implements`](crate::policy::DescriptorBuilder::implements)
/// and matched by protocol, method name and argument type. The first method
/// to respond supplies the result.
pub struct HandleMethod {
    protocol: TypeKey,
    method: Arc<str>,
    args: AnyValue,
    slot: Slot,
}

impl HandleMethod {
    /// A call of `method` on `protocol` with `args`.
    pub fn new<A>(protocol: TypeKey, method: impl Into<Arc<str>>, args: A) -> Self
    where
        A: Any + Send + Sync,
    {
        Self {
            protocol,
            method: method.into(),
            args: Arc::new(args),
            slot: Slot::new(false),
        }
    }

    /// A call of `method` on the protocol `P`.
    pub fn of<P: Typed, A: Any + Send + Sync>(method: impl Into<Arc<str>>, args: A) -> Self {
        Self::new(P::type_key(), method, args)
    }

    /// The protocol the method belongs to.
    pub fn protocol(&self) -> &TypeKey {
        &self.protocol
    }

    /// The method name.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The arguments, if they are an `A`.
    pub fn args<A: Any>(&self) -> Option<&A> {
        self.args.downcast_ref::<A>()
    }

    /// The return value as a promise, or `None` if no method responded.
    pub fn result(&self) -> Option<Promise<AnyValue>> {
        self.slot.first().map(Response::into_promise)
    }
}

impl Callback for HandleMethod {
    fn policy(&self) -> &Policy {
        Policy::handles_method()
    }

    fn respond(&self, response: Response) -> bool {
        self.slot.offer(response)
    }

    fn pending(&self) -> Option<Promise<AnyValue>> {
        self.slot.pending()
    }

    fn describe(&self) -> String {
        format!("method {}::{}", self.protocol, self.method)
    }
}

impl std::fmt::Debug for HandleMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandleMethod")
            .field("protocol", &self.protocol)
            .field("method", &self.method)
            .field("responses", &self.slot.len())
            .finish_non_exhaustive()
    }
}
