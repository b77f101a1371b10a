//! Filter pipelines around method invocations.
//!
//! A [`Filter`] wraps a matched method: it receives the callback and a
//! [`Next`] continuation and may proceed, post-process the reply, replace
//! the callback, or answer without proceeding. Filters come from
//! [`FilterProvider`]s declared at four levels, assembled in this order:
//!
//! 1. the method
//! 2. the handler type
//! 3. the policy
//! 4. per-call [`FilterOptions`] gathered from decorators
//!
//! The assembled filters are then stably sorted by [`Filter::order`], lowest
//! first and unordered filters last. The first filter runs outermost.

mod pipeline;
mod trace;

use std::sync::{Arc, LazyLock};

use crate::callback::{Callback, FilterOptions, Inquiry, Options};
use crate::foundation::{DispatchError, DispatchResult, Key, TypeKey};
use crate::handler::Handler;
use crate::policy::{HandlerDescriptor, MethodDescriptor, Policy, Reply};

pub use pipeline::{Next, Terminal, invoke};
pub use trace::TracingFilter;

static FILTER: LazyLock<TypeKey> =
    LazyLock::new(|| TypeKey::definition("Filter", ["C", "R"], []));

/// An around-interceptor of a method invocation.
pub trait Filter: Send + Sync + 'static {
    /// Position in the pipeline; lower runs first, `None` runs last.
    fn order(&self) -> Option<i32> {
        None
    }

    /// Runs this stage. Call [`Next::proceed`] to continue.
    fn next(&self, callback: &dyn Callback, next: Next<'_>) -> DispatchResult<Reply>;
}

/// Supplies filters for a method about to be invoked.
pub trait FilterProvider: Send + Sync + 'static {
    /// Whether the method must not run without this provider's filters.
    ///
    /// Required providers survive skipping and fail the dispatch with
    /// [`DispatchError::FilterAborted`] when they supply nothing.
    fn required(&self) -> bool {
        false
    }

    /// Filters for `method` servicing `callback`.
    fn filters(
        &self,
        method: &MethodDescriptor,
        callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> DispatchResult<Vec<Arc<dyn Filter>>>;
}

impl<P: FilterProvider + ?Sized> FilterProvider for Arc<P> {
    fn required(&self) -> bool {
        (**self).required()
    }

    fn filters(
        &self,
        method: &MethodDescriptor,
        callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> DispatchResult<Vec<Arc<dyn Filter>>> {
        (**self).filters(method, callback, composer)
    }
}

/// The key under which handlers provide filters for callbacks keyed by
/// `callback` producing `result`.
///
/// Providers usually declare it open, e.g. `filter_key(param("C"), any())`.
pub fn filter_key(callback: TypeKey, result: TypeKey) -> TypeKey {
    FILTER.construct([callback, result])
}

fn is_filter_key(key: &Key) -> bool {
    matches!(key, Key::Type(t) if t.generic_definition() == Some(&*FILTER))
}

// =============================================================================
// Providers
// =============================================================================

/// A fixed set of filter instances.
#[derive(Clone, Default)]
pub struct Filters {
    filters: Vec<Arc<dyn Filter>>,
    required: bool,
}

impl Filters {
    /// Provides `filters` to every method.
    pub fn new(filters: impl IntoIterator<Item = Arc<dyn Filter>>) -> Self {
        Self {
            filters: filters.into_iter().collect(),
            required: false,
        }
    }

    /// Provides a single filter.
    pub fn of(filter: impl Filter) -> Self {
        Self::new([Arc::new(filter) as Arc<dyn Filter>])
    }

    /// Marks the provider as required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

impl FilterProvider for Filters {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _method: &MethodDescriptor,
        _callback: &dyn Callback,
        _composer: &dyn Handler,
    ) -> DispatchResult<Vec<Arc<dyn Filter>>> {
        Ok(self.filters.clone())
    }
}

impl std::fmt::Debug for Filters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Filters")
            .field("filters", &self.filters.len())
            .field("required", &self.required)
            .finish()
    }
}

/// Resolves filters from the composer at dispatch time.
///
/// Asks for every value of [`filter_key`] built from the callback's key: a
/// type key `T` asks for `Filter<T, Any>`, a pair `(I, O)` for `Filter<I, O>`.
/// Values must be `Arc<dyn Filter>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resolving {
    required: bool,
}

impl Resolving {
    /// An optional resolving provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// A resolving provider that must find at least one filter.
    pub fn required() -> Self {
        Self { required: true }
    }
}

impl FilterProvider for Resolving {
    fn required(&self) -> bool {
        self.required
    }

    fn filters(
        &self,
        _method: &MethodDescriptor,
        callback: &dyn Callback,
        composer: &dyn Handler,
    ) -> DispatchResult<Vec<Arc<dyn Filter>>> {
        let (input, output) = match callback.policy().key_of(callback) {
            Some(Key::Type(t)) => (t, TypeKey::any()),
            Some(Key::Pair(i, o)) => (i, o),
            Some(Key::Name(_)) | None => return Ok(Vec::new()),
        };
        let inquiry = Inquiry::many(filter_key(input, output));
        composer.handle_callback(&inquiry, true, composer)?;
        Ok(inquiry.ready::<Arc<dyn Filter>>())
    }
}

// =============================================================================
// Assembly
// =============================================================================

/// Collects and orders the filters for one method invocation.
///
/// Methods answering a filter inquiry run unfiltered.
pub fn assemble(
    policy: &Policy,
    descriptor: &HandlerDescriptor,
    method: &MethodDescriptor,
    callback: &dyn Callback,
    composer: &dyn Handler,
) -> DispatchResult<Vec<Arc<dyn Filter>>> {
    if callback
        .downcast_ref::<Inquiry>()
        .is_some_and(|inquiry| is_filter_key(inquiry.key()))
    {
        return Ok(Vec::new());
    }
    let options = Options::<FilterOptions>::query(composer)?.unwrap_or_default();
    let skip = method.skips_filters() || options.skip == Some(true);

    let providers = method
        .filters()
        .iter()
        .chain(descriptor.filters())
        .chain(policy.filters())
        .chain(&options.providers);

    let mut filters: Vec<Arc<dyn Filter>> = Vec::new();
    for provider in providers {
        if skip && !provider.required() {
            continue;
        }
        let found = provider.filters(method, callback, composer)?;
        if found.is_empty() && provider.required() {
            return Err(DispatchError::FilterAborted {
                method: method.name().to_string(),
                reason: format!("no filter available for {}", callback.describe()),
            });
        }
        filters.extend(found);
    }
    filters.sort_by_key(|filter| match filter.order() {
        Some(order) => (0, order),
        None => (1, 0),
    });
    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Command;
    use crate::foundation::{TypeParam, Typed};
    use crate::handler::{HandlerExt, HandlerRefExt, Leaf, chain};
    use crate::policy::{Describe, DescriptorBuilder, Invocation};
    use parking_lot::Mutex;

    struct Order(u32);
    impl Typed for Order {}

    /// Records its label before proceeding.
    struct Mark {
        label: &'static str,
        order: Option<i32>,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Filter for Mark {
        fn order(&self) -> Option<i32> {
            self.order
        }

        fn next(&self, _callback: &dyn Callback, next: Next<'_>) -> DispatchResult<Reply> {
            self.log.lock().push(self.label);
            next.proceed()
        }
    }

    struct Gate;

    impl Filter for Gate {
        fn order(&self) -> Option<i32> {
            Some(5)
        }

        fn next(&self, callback: &dyn Callback, next: Next<'_>) -> DispatchResult<Reply> {
            let command = callback.downcast_ref::<Command>();
            match command.and_then(|c| c.payload().downcast_ref::<Order>()) {
                Some(order) if order.0 == 0 => Ok(Reply::value("rejected".to_string())),
                _ => next.proceed(),
            }
        }
    }

    struct Shop {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Describe for Shop {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|shop: &Self, order: &Order, _: &Invocation<'_>| {
                shop.log.lock().push("method");
                Reply::value(format!("order {}", order.0))
            });
        }
    }

    fn mark(label: &'static str, order: Option<i32>, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<dyn Filter> {
        Arc::new(Mark {
            label,
            order,
            log: log.clone(),
        })
    }

    #[test]
    fn test_filters_run_in_ascending_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log: log.clone() }).into_ref();
        let handler = shop.with_filters(Filters::new([
            mark("last", None, &log),
            mark("ten", Some(10), &log),
            mark("one", Some(1), &log),
            mark("also-ten", Some(10), &log),
        ]));

        let command = Command::new(Order(7));
        assert!(handler.handle(&command).unwrap());
        assert_eq!(*log.lock(), ["one", "ten", "also-ten", "last", "method"]);
    }

    #[test]
    fn test_short_circuit_skips_method_and_later_filters() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log: log.clone() }).into_ref();
        let handler = shop.with_filters(Filters::new([
            mark("before", Some(1), &log),
            Arc::new(Gate),
            mark("after", Some(9), &log),
        ]));

        let rejected: String = handler.command(Order(0)).unwrap();
        assert_eq!(rejected, "rejected");
        assert_eq!(*log.lock(), ["before"]);
    }

    /// Fails before proceeding.
    struct Broken;

    impl Filter for Broken {
        fn next(&self, _callback: &dyn Callback, _next: Next<'_>) -> DispatchResult<Reply> {
            Err(DispatchError::custom("ledger offline"))
        }
    }

    #[tokio::test]
    async fn test_filter_failure_rejects_result() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log: log.clone() }).into_ref();
        let handler = shop
            .with_filters(Filters::new([mark("outer", Some(1), &log)]))
            .with_filters(Filters::of(Broken));

        let err = handler.command_async::<String>(Order(2)).await.unwrap_err();
        match err {
            DispatchError::MethodFault { method, source } => {
                assert!(!method.is_empty());
                assert_eq!(source.to_string(), "ledger offline");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(*log.lock(), ["outer"]);
    }

    #[test]
    fn test_skip_keeps_required_providers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log: log.clone() }).into_ref();
        let handler = shop
            .with_filters(Filters::new([mark("optional", None, &log)]))
            .with_filters(Filters::new([mark("required", None, &log)]).required())
            .skip_filters();

        assert!(handler.handle(&Command::new(Order(1))).unwrap());
        assert_eq!(*log.lock(), ["required", "method"]);
    }

    #[test]
    fn test_required_provider_without_filters_aborts() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log }).into_ref();
        let handler = shop.with_filters(Resolving::required());

        let err = handler.handle(&Command::new(Order(1))).unwrap_err();
        assert!(matches!(err, DispatchError::FilterAborted { .. }));
    }

    struct Audit {
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Describe for Audit {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.provides_key(filter_key(TypeKey::param("C"), TypeKey::any()), |audit: &Self, _| {
                let filter = mark("audit", Some(0), &audit.log);
                Reply::value(filter)
            })
            .generic([TypeParam::new("C")]);
        }
    }

    #[test]
    fn test_resolving_provider_finds_filters_on_composer() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let shop = Leaf::new(Shop { log: log.clone() }).into_ref();
        let audit = Leaf::new(Audit { log: log.clone() }).into_ref();
        let handler = chain(shop, [audit]).with_filters(Resolving::required());

        assert!(handler.handle(&Command::new(Order(3))).unwrap());
        assert_eq!(*log.lock(), ["audit", "method"]);
    }
}
