//! Type-erased values carried in result slots and promises.

use std::any::Any;
use std::sync::Arc;

use super::error::{DispatchError, DispatchResult};

/// A shared, type-erased value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Access to `&dyn Any` from a trait object.
///
/// Implemented for every sized `'static` type. Call it on the dereferenced
/// trait object: calling it on an `Arc<dyn Trait>` yields the `Arc` itself.
pub trait AsAny {
    /// Returns `self` as `&dyn Any`.
    fn as_any(&self) -> &dyn Any;

    /// The concrete type's name.
    fn type_name(&self) -> &'static str;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Wraps a value for a result slot.
pub fn erase<T: Any + Send + Sync>(value: T) -> AnyValue {
    Arc::new(value)
}

/// Clones the `T` out of an erased value.
pub fn downcast<T: Any + Clone>(value: &AnyValue) -> DispatchResult<T> {
    value
        .downcast_ref::<T>()
        .cloned()
        .ok_or_else(|| DispatchError::type_mismatch(std::any::type_name::<T>(), "erased value"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_downcast_roundtrip() {
        let value = erase(42u32);
        assert_eq!(downcast::<u32>(&value).unwrap(), 42);
        assert!(matches!(
            downcast::<String>(&value),
            Err(DispatchError::TypeMismatch { .. })
        ));
    }
}
