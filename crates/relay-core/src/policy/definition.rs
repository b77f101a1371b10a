//! Policy definitions.

use std::sync::{Arc, LazyLock};

use super::descriptor::{HandlerDescriptor, MethodDescriptor};
use super::variance::Variance;
use crate::callback::{Callback, Command, HandleMethod, Inquiry};
use crate::filter::FilterProvider;
use crate::foundation::{Bindings, Key};

type KeyFn = Arc<dyn Fn(&dyn Callback) -> Option<Key> + Send + Sync>;
type PolicyApproval = Arc<dyn Fn(&dyn Callback, &MethodDescriptor) -> bool + Send + Sync>;

static HANDLES: LazyLock<Policy> = LazyLock::new(|| {
    Policy::builder("handles", Variance::Contravariant)
        .key(|callback| {
            callback
                .downcast_ref::<Command>()
                .map(|command| Key::Type(command.payload().payload_key()))
        })
        .strict(true)
        .build()
});

static PROVIDES: LazyLock<Policy> = LazyLock::new(|| {
    Policy::builder("provides", Variance::Covariant)
        .key(|callback| {
            callback
                .downcast_ref::<Inquiry>()
                .map(|inquiry| inquiry.key().clone())
        })
        .build()
});

static HANDLES_METHOD: LazyLock<Policy> = LazyLock::new(|| {
    Policy::builder("handles_method", Variance::Covariant)
        .key(|callback| {
            callback
                .downcast_ref::<HandleMethod>()
                .map(|call| Key::Type(call.protocol().clone()))
        })
        .strict(true)
        .build()
});

static OPTIONS: LazyLock<Policy> =
    LazyLock::new(|| Policy::builder("options", Variance::Invariant).build());

/// A named strategy for matching callbacks to methods.
///
/// The key extractor and variance are fixed when the policy is built.
pub struct Policy {
    name: Arc<str>,
    variance: Variance,
    key: KeyFn,
    strict: bool,
    approve: Option<PolicyApproval>,
    filters: Vec<Arc<dyn FilterProvider>>,
}

/// A method resolved by [`Policy::resolve`].
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Index of the handler in the candidate list.
    pub handler: usize,
    /// The matched method.
    pub method: Arc<MethodDescriptor>,
    /// Match accuracy, lower is better.
    pub accuracy: u32,
    /// Generic parameters bound by the match.
    pub bindings: Bindings,
}

impl Policy {
    /// Starts defining a policy.
    pub fn builder(name: impl Into<Arc<str>>, variance: Variance) -> PolicyBuilder {
        PolicyBuilder {
            name: name.into(),
            variance,
            key: None,
            strict: false,
            approve: None,
            filters: Vec::new(),
        }
    }

    /// Contravariant, strict policy for [`Command`] payloads.
    pub fn handles() -> &'static Policy {
        &HANDLES
    }

    /// Covariant, non-strict policy for [`Inquiry`] keys.
    pub fn provides() -> &'static Policy {
        &PROVIDES
    }

    /// Strict policy for [`HandleMethod`] calls.
    ///
    /// A method declared for a protocol services calls on that protocol and
    /// on each of its supertypes.
    pub fn handles_method() -> &'static Policy {
        &HANDLES_METHOD
    }

    /// Policy of options callbacks, which no method matches.
    pub fn options() -> &'static Policy {
        &OPTIONS
    }

    /// The policy's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The policy's variance.
    pub fn variance(&self) -> Variance {
        self.variance
    }

    /// Whether an unhandled callback is an error.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Policy-level filter providers.
    pub fn filters(&self) -> &[Arc<dyn FilterProvider>] {
        &self.filters
    }

    /// Extracts the matching key from `callback`.
    pub fn key_of(&self, callback: &dyn Callback) -> Option<Key> {
        (self.key)(callback)
    }

    /// Runs the policy's approval predicate.
    pub fn approves(&self, callback: &dyn Callback, method: &MethodDescriptor) -> bool {
        self.approve
            .as_ref()
            .is_none_or(|approve| approve(callback, method))
    }

    /// Finds the approved methods of `handlers` able to service `callback`.
    ///
    /// Ordered by accuracy, then handler order, then declaration order.
    pub fn resolve(&self, callback: &dyn Callback, handlers: &[Arc<HandlerDescriptor>]) -> Vec<Resolution> {
        let Some(key) = self.key_of(callback) else {
            return Vec::new();
        };
        let mut resolved: Vec<Resolution> = handlers
            .iter()
            .enumerate()
            .flat_map(|(handler, descriptor)| {
                descriptor
                    .candidates(self, &key)
                    .iter()
                    .filter(|c| self.approves(callback, &c.method) && c.method.approves(callback))
                    .map(|c| Resolution {
                        handler,
                        method: c.method.clone(),
                        accuracy: c.accuracy,
                        bindings: c.bindings.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        resolved.sort_by_key(|r| (r.accuracy, r.handler, r.method.index()));
        resolved
    }
}

impl std::fmt::Debug for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Policy")
            .field("name", &self.name)
            .field("variance", &self.variance)
            .field("strict", &self.strict)
            .field("filters", &self.filters.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Policy`].
pub struct PolicyBuilder {
    name: Arc<str>,
    variance: Variance,
    key: Option<KeyFn>,
    strict: bool,
    approve: Option<PolicyApproval>,
    filters: Vec<Arc<dyn FilterProvider>>,
}

impl PolicyBuilder {
    /// Sets the key extractor. Without one, the policy matches nothing.
    pub fn key<F>(mut self, key: F) -> Self
    where
        F: Fn(&dyn Callback) -> Option<Key> + Send + Sync + 'static,
    {
        self.key = Some(Arc::new(key));
        self
    }

    /// Makes unhandled callbacks an error.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Admits only methods accepted by `approve`.
    pub fn approve<F>(mut self, approve: F) -> Self
    where
        F: Fn(&dyn Callback, &MethodDescriptor) -> bool + Send + Sync + 'static,
    {
        self.approve = Some(Arc::new(approve));
        self
    }

    /// Adds a filter provider applied to every method of the policy.
    pub fn filter(mut self, provider: impl FilterProvider) -> Self {
        self.filters.push(Arc::new(provider));
        self
    }

    /// Finishes the policy.
    pub fn build(self) -> Policy {
        Policy {
            name: self.name,
            variance: self.variance,
            key: self.key.unwrap_or_else(|| Arc::new(|_| None)),
            strict: self.strict,
            approve: self.approve,
            filters: self.filters,
        }
    }
}
