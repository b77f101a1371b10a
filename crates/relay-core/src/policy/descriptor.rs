//! Method and handler descriptors.
//!
//! A [`HandlerDescriptor`] lists the methods a handler type exposes, grouped
//! by policy. Descriptors are produced by a [`DescriptorBuilder`], usually
//! from a [`Describe`] implementation, and cached once per Rust type:
//!
//! ```rust,ignore
//! struct Kennel;
//!
//! impl Describe for Kennel {
//!     fn describe(d: &mut DescriptorBuilder<Self>) {
//!         d.handles(|_kennel: &Self, feed: &Feed, _inv: &Invocation<'_>| {
//!             println!("feeding {}", feed.name);
//!         });
//!         d.provides::<Dog, _, _>(|_kennel, _inv| Reply::value(Dog::default()))
//!             .named("adopt");
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use tracing::trace;

use super::definition::Policy;
use super::dispatch::{Invocation, IntoReply, Reply};
use crate::callback::{Callback, Command, HandleMethod};
use crate::filter::FilterProvider;
use crate::foundation::{Bindings, DispatchResult, Key, Payload, TypeKey, TypeParam, Typed};

type MethodFn = Arc<dyn Fn(&dyn Any, &Invocation<'_>) -> DispatchResult<Reply> + Send + Sync>;
type MethodApproval = Arc<dyn Fn(&dyn Callback) -> bool + Send + Sync>;

static DESCRIPTORS: LazyLock<RwLock<HashMap<TypeId, Arc<HandlerDescriptor>>>> =
    LazyLock::new(|| RwLock::new(HashMap::new()));

/// Declares the methods of a handler type.
pub trait Describe: Send + Sync + 'static {
    /// Registers the type's methods.
    fn describe(builder: &mut DescriptorBuilder<Self>)
    where
        Self: Sized;
}

// =============================================================================
// MethodDescriptor
// =============================================================================

/// An invocable handler method and the key it is declared for.
pub struct MethodDescriptor {
    name: Arc<str>,
    policy: Arc<str>,
    key: Key,
    params: Vec<TypeParam>,
    filters: Vec<Arc<dyn FilterProvider>>,
    skip_filters: bool,
    approve: Option<MethodApproval>,
    invoke: MethodFn,
    index: usize,
}

impl MethodDescriptor {
    /// Method name used in logs and errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the policy the method is registered under.
    pub fn policy(&self) -> &str {
        &self.policy
    }

    /// Declared key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Generic parameters of the declared key.
    pub fn params(&self) -> &[TypeParam] {
        &self.params
    }

    /// Method-level filter providers.
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }

    /// Whether non-required filters are skipped.
    pub fn skips_filters(&self) -> bool {
        self.skip_filters
    }

    /// Declaration order within the handler.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Runs the method's own approval predicate.
    pub fn approves(&self, callback: &dyn Callback) -> bool {
        self.approve.as_ref().is_none_or(|approve| approve(callback))
    }

    /// Invokes the method on `target`.
    pub fn invoke(&self, target: &dyn Any, invocation: &Invocation<'_>) -> DispatchResult<Reply> {
        (self.invoke)(target, invocation)
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("key", &self.key)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// Further configuration of a method just added to a [`DescriptorBuilder`].
pub struct MethodConfig<'a> {
    method: &'a mut MethodDescriptor,
}

impl MethodConfig<'_> {
    /// Renames the method.
    pub fn named(self, name: impl Into<Arc<str>>) -> Self {
        self.method.name = name.into();
        self
    }

    /// Declares the generic parameters mentioned by the method's key.
    pub fn generic(self, params: impl IntoIterator<Item = TypeParam>) -> Self {
        self.method.params = params.into_iter().collect();
        self
    }

    /// Adds a method-level filter provider.
    pub fn filter(self, provider: impl FilterProvider) -> Self {
        self.method.filters.push(Arc::new(provider));
        self
    }

    /// Skips every non-required filter for this method.
    pub fn skip_filters(self) -> Self {
        self.method.skip_filters = true;
        self
    }

    /// Admits the method only for callbacks accepted by `approve`.
    pub fn approve<F>(self, approve: F) -> Self
    where
        F: Fn(&dyn Callback) -> bool + Send + Sync + 'static,
    {
        self.method.approve = Some(Arc::new(approve));
        self
    }
}

// =============================================================================
// HandlerDescriptor
// =============================================================================

/// A method matched against a callback key.
#[derive(Debug, Clone)]
pub struct Candidate {
    /// The matched method.
    pub method: Arc<MethodDescriptor>,
    /// Match accuracy, lower is better.
    pub accuracy: u32,
    /// Generic parameters bound by the match.
    pub bindings: Bindings,
}

/// The methods of one handler type, grouped by policy.
pub struct HandlerDescriptor {
    name: Arc<str>,
    filters: Vec<Arc<dyn FilterProvider>>,
    policies: HashMap<Arc<str>, Vec<Arc<MethodDescriptor>>>,
    candidates: RwLock<HashMap<(Arc<str>, Key), Arc<[Candidate]>>>,
}

impl HandlerDescriptor {
    /// Returns the cached descriptor of `H`, describing it on first use.
    ///
    /// Concurrent first uses may both describe `H`; the first descriptor
    /// stored wins.
    pub fn of<H: Describe>() -> Arc<Self> {
        let id = TypeId::of::<H>();
        if let Some(descriptor) = DESCRIPTORS.read().get(&id) {
            return descriptor.clone();
        }
        let mut builder = DescriptorBuilder::<H>::new(std::any::type_name::<H>());
        H::describe(&mut builder);
        let built = Arc::new(builder.build());
        trace!(handler = %built.name, methods = built.method_count(), "described handler type");
        DESCRIPTORS.write().entry(id).or_insert(built).clone()
    }

    /// Starts a descriptor for `H` without caching it.
    pub fn builder<H: Send + Sync + 'static>(name: impl Into<Arc<str>>) -> DescriptorBuilder<H> {
        DescriptorBuilder::new(name)
    }

    /// Name of the described type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Handler-level filter providers.
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }

    /// Methods registered under `policy`, in declaration order.
    pub fn methods(&self, policy: &Policy) -> &[Arc<MethodDescriptor>] {
        self.policies.get(policy.name()).map_or(&[], Vec::as_slice)
    }

    /// Total number of methods across policies.
    pub fn method_count(&self) -> usize {
        self.policies.values().map(Vec::len).sum()
    }

    /// Methods of `policy` compatible with `key`, best first.
    ///
    /// Ties keep declaration order. Results are cached per key.
    pub fn candidates(&self, policy: &Policy, key: &Key) -> Arc<[Candidate]> {
        let cache_key = (Arc::<str>::from(policy.name()), key.clone());
        if let Some(found) = self.candidates.read().get(&cache_key) {
            return found.clone();
        }
        let mut matched: Vec<Candidate> = self
            .methods(policy)
            .iter()
            .filter_map(|method| {
                policy
                    .variance()
                    .matches(key, &method.key, &method.params)
                    .map(|m| Candidate {
                        method: method.clone(),
                        accuracy: m.accuracy,
                        bindings: m.bindings,
                    })
            })
            .collect();
        matched.sort_by_key(|c| c.accuracy);
        let matched: Arc<[Candidate]> = matched.into();
        self.candidates
            .write()
            .entry(cache_key)
            .or_insert(matched)
            .clone()
    }
}

impl std::fmt::Debug for HandlerDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerDescriptor")
            .field("name", &self.name)
            .field("policies", &self.policies.keys().collect::<Vec<_>>())
            .field("methods", &self.method_count())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// DescriptorBuilder
// =============================================================================

/// Registers the methods of handler type `H`.
pub struct DescriptorBuilder<H> {
    name: Arc<str>,
    filters: Vec<Arc<dyn FilterProvider>>,
    methods: Vec<MethodDescriptor>,
    _handler: PhantomData<fn(&H)>,
}

impl<H: Send + Sync + 'static> DescriptorBuilder<H> {
    /// Creates an empty builder.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            filters: Vec::new(),
            methods: Vec::new(),
            _handler: PhantomData,
        }
    }

    /// Adds a filter provider applied to every method of the handler.
    pub fn filter(&mut self, provider: impl FilterProvider) -> &mut Self {
        self.filters.push(Arc::new(provider));
        self
    }

    /// Registers a method under any policy.
    pub fn method<F, R>(&mut self, policy: &Policy, key: impl Into<Key>, f: F) -> MethodConfig<'_>
    where
        F: Fn(&H, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let key = key.into();
        let name = format!("{} {}", policy.name(), key);
        let invoke: MethodFn = Arc::new(move |target, invocation| match target.downcast_ref::<H>() {
            Some(handler) => f(handler, invocation).into_reply(),
            None => Ok(Reply::Skip),
        });
        self.push(policy, key, name, invoke)
    }

    /// Handles commands whose payload is a `C`.
    pub fn handles<C, F, R>(&mut self, f: F) -> MethodConfig<'_>
    where
        C: Typed,
        F: Fn(&H, &C, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.method(Policy::handles(), C::type_key(), move |handler, invocation| {
            match invocation.payload().and_then(|p| p.downcast_ref::<C>()) {
                Some(payload) => f(handler, payload, invocation).into_reply(),
                None => Ok(Reply::Skip),
            }
        })
    }

    /// Handles commands whose payload conforms to `key`, received untyped.
    pub fn handles_key<F, R>(&mut self, key: TypeKey, f: F) -> MethodConfig<'_>
    where
        F: Fn(&H, &dyn Payload, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.method(Policy::handles(), key, move |handler, invocation| {
            match invocation.callback().downcast_ref::<Command>() {
                Some(command) => f(handler, command.payload(), invocation).into_reply(),
                None => Ok(Reply::Skip),
            }
        })
    }

    /// Provides values of type `T` to inquiries.
    pub fn provides<T, F, R>(&mut self, f: F) -> MethodConfig<'_>
    where
        T: Typed,
        F: Fn(&H, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.method(Policy::provides(), T::type_key(), f)
    }

    /// Provides values for an arbitrary key, possibly open generic.
    pub fn provides_key<F, R>(&mut self, key: impl Into<Key>, f: F) -> MethodConfig<'_>
    where
        F: Fn(&H, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        self.method(Policy::provides(), key, f)
    }

    /// Implements `method` of protocol `P` for arguments of type `A`.
    ///
    /// Methods sharing a name but taking different argument types coexist;
    /// each call reaches the ones whose argument type matches.
    pub fn implements<P, A, F, R>(&mut self, method: impl Into<Arc<str>>, f: F) -> MethodConfig<'_>
    where
        P: Typed,
        A: Any + Send + Sync,
        F: Fn(&H, &A, &Invocation<'_>) -> R + Send + Sync + 'static,
        R: IntoReply,
    {
        let method: Arc<str> = method.into();
        let name = format!("{}::{}", P::type_key(), method);
        self.method(Policy::handles_method(), P::type_key(), move |handler, invocation| {
            let call = invocation.callback().downcast_ref::<HandleMethod>();
            match call.and_then(HandleMethod::args::<A>) {
                Some(args) => f(handler, args, invocation).into_reply(),
                None => Ok(Reply::Skip),
            }
        })
        .approve(move |callback| {
            callback
                .downcast_ref::<HandleMethod>()
                .is_some_and(|call| call.method() == &*method)
        })
        .named(name)
    }

    fn push(&mut self, policy: &Policy, key: Key, name: String, invoke: MethodFn) -> MethodConfig<'_> {
        let index = self.methods.len();
        self.methods.push(MethodDescriptor {
            name: name.into(),
            policy: policy.name().into(),
            key,
            params: Vec::new(),
            filters: Vec::new(),
            skip_filters: false,
            approve: None,
            invoke,
            index,
        });
        MethodConfig {
            method: &mut self.methods[index],
        }
    }

    /// Freezes the registered methods into a descriptor.
    pub fn build(self) -> HandlerDescriptor {
        let mut policies: HashMap<Arc<str>, Vec<Arc<MethodDescriptor>>> = HashMap::new();
        for method in self.methods {
            policies
                .entry(method.policy.clone())
                .or_default()
                .push(Arc::new(method));
        }
        HandlerDescriptor {
            name: self.name,
            filters: self.filters,
            policies,
            candidates: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::variance::GENERIC_PENALTY;

    struct Dog;
    impl Typed for Dog {}

    struct Kennel;

    impl Describe for Kennel {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles_key(TypeKey::any(), |_, _, _| ()).named("anything");
            d.handles(|_: &Self, _: &Dog, _: &Invocation<'_>| ()).named("dog");
            d.provides::<Dog, _, _>(|_, _| Reply::value(Dog));
            d.provides_key(
                TypeKey::definition("Vec", ["T"], []).construct([TypeKey::param("T")]),
                |_, _| Reply::Skip,
            )
            .generic([TypeParam::new("T")]);
        }
    }

    #[test]
    fn test_descriptor_is_cached_per_type() {
        let first = HandlerDescriptor::of::<Kennel>();
        let second = HandlerDescriptor::of::<Kennel>();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.method_count(), 4);
        assert_eq!(first.methods(Policy::handles()).len(), 2);
    }

    #[test]
    fn test_candidates_are_ranked() {
        let descriptor = HandlerDescriptor::of::<Kennel>();
        let candidates = descriptor.candidates(Policy::handles(), &Key::of::<Dog>());
        let names: Vec<&str> = candidates.iter().map(|c| c.method.name()).collect();
        assert_eq!(names, ["dog", "anything"]);

        let cached = descriptor.candidates(Policy::handles(), &Key::of::<Dog>());
        assert!(Arc::ptr_eq(&candidates, &cached));
    }

    #[test]
    fn test_generic_provider_matches_constructed_key() {
        let descriptor = HandlerDescriptor::of::<Kennel>();
        let wanted = TypeKey::definition("Vec", ["T"], []).construct([Dog::type_key()]);
        let candidates = descriptor.candidates(Policy::provides(), &wanted.into());
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].accuracy, GENERIC_PENALTY);
        assert_eq!(candidates[0].bindings.get("T"), Some(&Dog::type_key()));
    }
}
