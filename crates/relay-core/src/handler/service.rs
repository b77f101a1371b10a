//! tower integration.
//!
//! [`HandlerService`] exposes any handler as a `tower::Service` taking shared
//! callbacks, so dispatch can sit behind ordinary tower middleware. The
//! decorators are also available as [`Layer`]s over [`HandlerRef`]:
//!
//! ```rust,ignore
//! let handler = ServiceBuilder::new()
//!     .layer(FiltersLayer::new(Filters::of(TracingFilter::new())))
//!     .layer(SemanticsLayer::notify())
//!     .service(root);
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::Service;
use tower_layer::Layer;

use super::{HandlerExt, HandlerRef, HandlerRefExt};
use crate::callback::{Callback, CallbackOptions, CallbackSemantics};
use crate::filter::FilterProvider;
use crate::foundation::{DispatchError, DispatchResult};

/// A tower [`Service`] dispatching callbacks to a handler.
///
/// The response is whether the callback was handled. When a method left a
/// pending result on the callback, the future completes after it settles
/// and fails if it was rejected.
#[derive(Clone)]
pub struct HandlerService {
    handler: HandlerRef,
    greedy: bool,
}

impl HandlerService {
    /// Serves `handler` with non-greedy dispatch.
    pub fn new(handler: HandlerRef) -> Self {
        Self {
            handler,
            greedy: false,
        }
    }

    /// Serves `handler` with greedy dispatch.
    pub fn greedy(handler: HandlerRef) -> Self {
        Self {
            handler,
            greedy: true,
        }
    }
}

impl Service<Arc<dyn Callback>> for HandlerService {
    type Response = bool;
    type Error = DispatchError;
    type Future = BoxFuture<'static, DispatchResult<bool>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, callback: Arc<dyn Callback>) -> Self::Future {
        let handled = if self.greedy {
            self.handler.handle_all(&*callback)
        } else {
            self.handler.handle(&*callback)
        };
        async move {
            let handled = handled?;
            if let Some(pending) = callback.pending() {
                pending.await?;
            }
            Ok(handled)
        }
        .boxed()
    }
}

impl std::fmt::Debug for HandlerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerService")
            .field("greedy", &self.greedy)
            .finish_non_exhaustive()
    }
}

/// Layer applying [`CallbackSemantics`].
#[derive(Debug, Clone, Copy)]
pub struct SemanticsLayer(CallbackSemantics);

impl SemanticsLayer {
    /// Applies `semantics`.
    pub fn new(semantics: CallbackSemantics) -> Self {
        Self(semantics)
    }

    /// Broadcasts on a best-effort basis.
    pub fn notify() -> Self {
        Self(CallbackSemantics::new(CallbackOptions::NOTIFY))
    }
}

impl Layer<HandlerRef> for SemanticsLayer {
    type Service = HandlerRef;

    fn layer(&self, inner: HandlerRef) -> HandlerRef {
        inner.semantics(self.0)
    }
}

/// Layer adding a filter provider.
#[derive(Clone)]
pub struct FiltersLayer(Arc<dyn FilterProvider>);

impl FiltersLayer {
    /// Adds `provider` to every method invoked through the layered handler.
    pub fn new(provider: impl FilterProvider) -> Self {
        Self(Arc::new(provider))
    }
}

impl Layer<HandlerRef> for FiltersLayer {
    type Service = HandlerRef;

    fn layer(&self, inner: HandlerRef) -> HandlerRef {
        inner.with_filters(self.0.clone())
    }
}

impl std::fmt::Debug for FiltersLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiltersLayer").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::{Arc, Callback, FiltersLayer, HandlerExt, HandlerService, SemanticsLayer};
    use crate::callback::Command;
    use crate::filter::{Filters, TracingFilter};
    use crate::foundation::Typed;
    use crate::handler::Leaf;
    use crate::policy::{Describe, DescriptorBuilder, Invocation};
    use crate::promise::Promise;
    use std::time::Duration;
    use tower::{ServiceBuilder, ServiceExt};

    struct Tick;
    impl Typed for Tick {}

    struct Tock;
    impl Typed for Tock {}

    struct Clock;

    impl Describe for Clock {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|_: &Self, _: &Tick, _: &Invocation<'_>| {
                Promise::delay(Duration::from_millis(5)).map(|_| 1u64)
            });
        }
    }

    #[tokio::test]
    async fn test_service_waits_for_pending_result() {
        let service = HandlerService::new(Leaf::new(Clock).into_ref());
        let command = Arc::new(Command::new(Tick));
        let handled = service.oneshot(command.clone() as Arc<dyn Callback>).await.unwrap();
        assert!(handled);
        let value = command.result().unwrap().downcast::<u64>().await.unwrap();
        assert_eq!(value, 1);
    }

    #[tokio::test]
    async fn test_layers_stack_on_handler_ref() {
        let handler = ServiceBuilder::new()
            .layer(FiltersLayer::new(Filters::of(TracingFilter::new())))
            .layer(SemanticsLayer::notify())
            .service(Leaf::new(Clock).into_ref());

        let handled = HandlerService::new(handler)
            .oneshot(Arc::new(Command::new(Tock)) as Arc<dyn Callback>)
            .await
            .unwrap();
        assert!(handled);
    }
}
