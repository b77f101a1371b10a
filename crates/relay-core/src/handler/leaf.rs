use std::sync::Arc;

use super::Handler;
use crate::callback::Callback;
use crate::foundation::{DispatchResult, Typed};
use crate::policy::{self, Describe, DescriptorBuilder, HandlerDescriptor, Reply};

/// Routes callbacks to the described methods of a `H`.
pub struct Leaf<H> {
    target: H,
    descriptor: Arc<HandlerDescriptor>,
}

impl<H: Describe> Leaf<H> {
    /// Wraps `target` with its type's cached descriptor.
    pub fn new(target: H) -> Self {
        Self {
            target,
            descriptor: HandlerDescriptor::of::<H>(),
        }
    }
}

impl<H: Send + Sync + 'static> Leaf<H> {
    /// Wraps `target` with an explicitly built descriptor.
    pub fn with_descriptor(target: H, descriptor: Arc<HandlerDescriptor>) -> Self {
        Self { target, descriptor }
    }

    /// The wrapped value.
    pub fn get(&self) -> &H {
        &self.target
    }

    /// The descriptor methods are resolved from.
    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }
}

impl<H: Send + Sync + 'static> Handler for Leaf<H> {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        policy::dispatch(
            callback.policy(),
            &self.target,
            &self.descriptor,
            callback,
            greedy,
            composer,
        )
    }
}

impl<H> std::fmt::Debug for Leaf<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Leaf")
            .field("descriptor", &self.descriptor.name())
            .finish_non_exhaustive()
    }
}

/// Exposes a stored value to inquiries for its type.
#[derive(Debug, Clone)]
pub struct Provider<T> {
    value: T,
}

impl<T: Typed + Clone> Provider<T> {
    /// Provides `value`.
    pub fn new(value: T) -> Self {
        Self { value }
    }

    /// The stored value.
    pub fn value(&self) -> &T {
        &self.value
    }
}

impl<T: Typed + Clone> Describe for Provider<T> {
    fn describe(d: &mut DescriptorBuilder<Self>) {
        d.provides::<T, _, _>(|provider: &Self, _| Reply::value(provider.value.clone()))
            .named(format!("provide {}", std::any::type_name::<T>()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::TypeKey;
    use crate::handler::HandlerExt;
    use std::sync::LazyLock;

    #[derive(Debug, Clone, PartialEq)]
    struct Settings {
        retries: u32,
    }

    impl Typed for Settings {}

    #[test]
    fn test_provider_answers_inquiries() {
        let leaf = Leaf::new(Provider::new(Settings { retries: 2 }));
        assert_eq!(leaf.resolve::<Settings>().unwrap(), Some(Settings { retries: 2 }));
        assert_eq!(leaf.get().value().retries, 2);
    }

    static SHAPE: LazyLock<TypeKey> = LazyLock::new(|| TypeKey::nominal("Shape"));

    #[derive(Clone)]
    struct Circle;

    impl Typed for Circle {
        fn type_key() -> TypeKey {
            TypeKey::derived("Circle", [SHAPE.clone()])
        }
    }

    #[test]
    fn test_provider_satisfies_supertype_inquiry() {
        let leaf = Leaf::new(Provider::new(Circle));
        let shape = leaf.resolve_key::<Circle>(SHAPE.clone()).unwrap();
        assert!(shape.is_some());
    }

    #[test]
    fn test_explicit_descriptor() {
        let mut builder = HandlerDescriptor::builder::<u32>("counter");
        builder.provides_key(TypeKey::nominal("Limit"), |limit: &u32, _| Reply::value(*limit));
        let leaf = Leaf::with_descriptor(7u32, Arc::new(builder.build()));
        assert_eq!(leaf.resolve_key::<u32>(TypeKey::nominal("Limit")).unwrap(), Some(7));
        assert_eq!(leaf.descriptor().name(), "counter");
    }
}
