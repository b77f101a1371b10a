//! Typed protocol calls.
//!
//! A protocol is a [`Typed`] marker type. Handlers implement its methods with
//! [`DescriptorBuilder::implements`](crate::policy::DescriptorBuilder::implements)
//! and callers reach them through a [`Proxy`], usually behind a small adapter
//! trait written for `Proxy<'_, P>`:
//!
//! ```rust,ignore
//! struct Billing;
//! impl Typed for Billing {}
//!
//! trait BillingApi {
//!     fn charge(&self, cents: u64) -> DispatchResult<u64>;
//! }
//!
//! impl BillingApi for Proxy<'_, Billing> {
//!     fn charge(&self, cents: u64) -> DispatchResult<u64> {
//!         self.call("charge", cents)
//!     }
//! }
//!
//! let receipt = handler.proxy::<Billing>().charge(250)?;
//! ```

use std::any::Any;
use std::marker::PhantomData;

use super::{Handler, HandlerExt};
use crate::callback::{Callback, HandleMethod};
use crate::foundation::{DispatchError, DispatchResult, Typed};
use crate::promise::Promise;

/// Calls the methods of protocol `P` through a handler.
pub struct Proxy<'h, P> {
    handler: &'h dyn Handler,
    _protocol: PhantomData<fn() -> P>,
}

impl<'h, P: Typed> Proxy<'h, P> {
    /// A proxy dispatching through `handler`.
    pub fn new(handler: &'h dyn Handler) -> Self {
        Self {
            handler,
            _protocol: PhantomData,
        }
    }

    /// Calls `method` for its effect only.
    ///
    /// Returns whether any implementation ran. Broadcast semantics on the
    /// handler reach every implementation.
    pub fn invoke<A>(&self, method: &str, args: A) -> DispatchResult<bool>
    where
        A: Any + Send + Sync,
    {
        let call = HandleMethod::of::<P, _>(method, args);
        self.handler.handle(&call)
    }

    /// Calls `method` and returns its result without blocking.
    pub fn call_async<A, R>(&self, method: &str, args: A) -> Promise<R>
    where
        A: Any + Send + Sync,
        R: Clone + Send + Sync + 'static,
    {
        let call = HandleMethod::of::<P, _>(method, args);
        match self.handler.handle(&call) {
            Ok(true) => match call.result() {
                Some(result) => result.downcast::<R>(),
                None => Promise::rejected(DispatchError::type_mismatch(
                    std::any::type_name::<R>(),
                    "no result",
                )),
            },
            Ok(false) => Promise::rejected(DispatchError::not_handled(call.describe())),
            Err(e) => Promise::rejected(e),
        }
    }

    /// Calls `method`, blocking while its result is pending.
    pub fn call<A, R>(&self, method: &str, args: A) -> DispatchResult<R>
    where
        A: Any + Send + Sync,
        R: Clone + Send + Sync + 'static,
    {
        self.call_async(method, args).wait()
    }
}

impl<P> std::fmt::Debug for Proxy<'_, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("protocol", &std::any::type_name::<P>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::{Arc, LazyLock};

    use super::*;
    use crate::foundation::TypeKey;
    use crate::handler::{HandlerRefExt, Leaf};
    use crate::policy::{Describe, DescriptorBuilder, Reply};

    struct Billing;
    impl Typed for Billing {}

    static AUDITED_KEY: LazyLock<TypeKey> =
        LazyLock::new(|| TypeKey::derived("AuditedBilling", [Billing::type_key()]));

    /// Extends `Billing`; its implementors also serve `Billing` calls.
    struct AuditedBilling;
    impl Typed for AuditedBilling {
        fn type_key() -> TypeKey {
            AUDITED_KEY.clone()
        }
    }

    trait BillingApi {
        fn charge(&self, cents: u64) -> DispatchResult<u64>;
        fn refund(&self, cents: u64) -> DispatchResult<bool>;
    }

    impl BillingApi for Proxy<'_, Billing> {
        fn charge(&self, cents: u64) -> DispatchResult<u64> {
            self.call("charge", cents)
        }

        fn refund(&self, cents: u64) -> DispatchResult<bool> {
            self.invoke("refund", cents)
        }
    }

    struct Till {
        fee: u64,
        refunded: AtomicU64,
    }

    impl Describe for Till {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.implements::<Billing, u64, _, _>("charge", |till: &Self, cents: &u64, _| {
                Reply::value(cents + till.fee)
            });
            d.implements::<Billing, u64, _, _>("refund", |till: &Self, cents: &u64, _| {
                till.refunded.fetch_add(*cents, Ordering::SeqCst);
            });
            d.implements::<Billing, (), _, _>("settle", |till: &Self, _: &(), _| {
                Promise::resolved(till.refunded.load(Ordering::SeqCst))
            });
        }
    }

    struct Auditor;

    impl Describe for Auditor {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.implements::<AuditedBilling, u64, _, _>("charge", |_: &Self, cents: &u64, _| {
                Reply::value(cents * 2)
            });
        }
    }

    fn till(fee: u64) -> Leaf<Till> {
        Leaf::new(Till {
            fee,
            refunded: AtomicU64::new(0),
        })
    }

    #[test]
    fn test_adapter_calls_protocol_methods() {
        let leaf = till(5);
        let billing = leaf.proxy::<Billing>();
        assert_eq!(billing.charge(100).unwrap(), 105);
        assert!(billing.refund(40).unwrap());
        assert_eq!(leaf.get().refunded.load(Ordering::SeqCst), 40);
    }

    #[test]
    fn test_chain_falls_through_to_implementor() {
        let handler = Leaf::new(Auditor).into_ref().chain([till(1).into_ref()]);
        // Auditor implements the sub-protocol, so it answers first.
        assert_eq!(handler.proxy::<Billing>().charge(10).unwrap(), 20);
        assert!(handler.proxy::<Billing>().refund(3).unwrap());
    }

    #[test]
    fn test_super_protocol_implementor_ignores_sub_protocol_calls() {
        let leaf = till(1);
        let err = leaf
            .proxy::<AuditedBilling>()
            .call::<_, u64>("charge", 10u64)
            .unwrap_err();
        assert!(err.is_not_handled());
    }

    #[test]
    fn test_broadcast_reaches_every_implementor() {
        let first = Arc::new(till(0));
        let second = Arc::new(till(0));
        let handler = first.clone().into_ref().chain([second.clone().into_ref()]).broadcast();
        assert!(handler.proxy::<Billing>().refund(7).unwrap());
        assert_eq!(first.get().refunded.load(Ordering::SeqCst), 7);
        assert_eq!(second.get().refunded.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn test_unknown_method() {
        let leaf = till(0);
        let err = leaf.proxy::<Billing>().invoke("void", 1u64).unwrap_err();
        assert!(err.is_not_handled());

        let relaxed = till(0).into_ref().best_effort();
        assert!(relaxed.proxy::<Billing>().invoke("void", 1u64).unwrap());
    }

    #[test]
    fn test_argument_type_must_match() {
        let err = till(0)
            .proxy::<Billing>()
            .call::<_, u64>("charge", "ten")
            .unwrap_err();
        assert!(err.is_not_handled());
    }

    #[tokio::test]
    async fn test_call_async_returns_method_promise() {
        let leaf = till(0);
        let billing = leaf.proxy::<Billing>();
        billing.refund(12).unwrap();
        let settled: u64 = billing.call_async("settle", ()).await.unwrap();
        assert_eq!(settled, 12);
    }
}
