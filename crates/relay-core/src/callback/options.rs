//! Per-call settings gathered from decorators.
//!
//! An [`Options`] callback is dispatched greedily through a handler; each
//! decorator that carries settings of that type merges them in. Decorators
//! are visited outermost first, so [`Mergeable::merge_into`] implementations
//! keep what is already set.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;

use super::Callback;
use crate::filter::FilterProvider;
use crate::foundation::DispatchResult;
use crate::handler::Handler;
use crate::policy::Policy;

/// Settings that can be combined across decorators.
pub trait Mergeable: Default + Clone + Send + Sync + 'static {
    /// Merges `self` into `target`, keeping settings `target` already has.
    fn merge_into(&self, target: &mut Self);
}

/// Callback collecting settings of type `T`.
pub struct Options<T> {
    value: Mutex<T>,
}

impl<T: Mergeable> Options<T> {
    /// Empty options.
    pub fn new() -> Self {
        Self {
            value: Mutex::new(T::default()),
        }
    }

    /// Merges a decorator's settings.
    pub fn merge(&self, settings: &T) {
        settings.merge_into(&mut self.value.lock());
    }

    /// The settings gathered so far.
    pub fn get(&self) -> T {
        self.value.lock().clone()
    }

    /// Asks `handler` for its settings, `None` if no decorator answered.
    pub fn query(handler: &dyn Handler) -> DispatchResult<Option<T>> {
        let options = Self::new();
        let answered = handler.handle_callback(&options, true, handler)?;
        Ok(answered.then(|| options.get()))
    }
}

impl<T: Mergeable> Default for Options<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Mergeable> Callback for Options<T> {
    fn policy(&self) -> &Policy {
        Policy::options()
    }

    fn describe(&self) -> String {
        format!("options {}", std::any::type_name::<T>())
    }
}

// =============================================================================
// Callback semantics
// =============================================================================

bitflags! {
    /// How a callback is dispatched.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct CallbackOptions: u8 {
        /// Fail when no method handles the callback, whatever the policy.
        const STRICT      = 0b0000_0001;
        /// Offer the callback to every handler.
        const BROADCAST   = 0b0000_0010;
        /// Report the callback as handled even when nothing handled it.
        const BEST_EFFORT = 0b0000_0100;
        /// Broadcast on a best-effort basis.
        const NOTIFY      = Self::BROADCAST.bits() | Self::BEST_EFFORT.bits();
    }
}

/// Dispatch flags plus the set of flags a decorator explicitly decided.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallbackSemantics {
    options: CallbackOptions,
    specified: CallbackOptions,
}

impl CallbackSemantics {
    /// Semantics that turn `options` on.
    pub fn new(options: CallbackOptions) -> Self {
        Self {
            options,
            specified: options,
        }
    }

    /// Explicitly turns `flags` on or off.
    pub fn set(mut self, flags: CallbackOptions, on: bool) -> Self {
        self.options.set(flags, on);
        self.specified |= flags;
        self
    }

    /// Returns `true` if every flag in `flags` is on.
    pub fn has(&self, flags: CallbackOptions) -> bool {
        self.options.contains(flags)
    }

    /// Returns `true` if every flag in `flags` was decided.
    pub fn is_specified(&self, flags: CallbackOptions) -> bool {
        self.specified.contains(flags)
    }

    /// The effective flags.
    pub fn options(&self) -> CallbackOptions {
        self.options
    }
}

impl Mergeable for CallbackSemantics {
    fn merge_into(&self, target: &mut Self) {
        let open = self.specified - target.specified;
        target.options = (target.options - open) | (self.options & open);
        target.specified |= open;
    }
}

// =============================================================================
// Filter options
// =============================================================================

/// Per-call changes to method pipelines.
#[derive(Clone, Default)]
pub struct FilterOptions {
    /// Providers appended after method, handler and policy filters.
    pub providers: Vec<Arc<dyn FilterProvider>>,
    /// Drop every provider that is not required.
    pub skip: Option<bool>,
}

impl FilterOptions {
    /// Options adding `providers`.
    pub fn with(providers: impl IntoIterator<Item = Arc<dyn FilterProvider>>) -> Self {
        Self {
            providers: providers.into_iter().collect(),
            skip: None,
        }
    }

    /// Options skipping every non-required provider.
    pub fn skipping() -> Self {
        Self {
            providers: Vec::new(),
            skip: Some(true),
        }
    }
}

impl Mergeable for FilterOptions {
    fn merge_into(&self, target: &mut Self) {
        target.providers.extend(self.providers.iter().cloned());
        if target.skip.is_none() {
            target.skip = self.skip;
        }
    }
}

impl std::fmt::Debug for FilterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterOptions")
            .field("providers", &self.providers.len())
            .field("skip", &self.skip)
            .finish()
    }
}
