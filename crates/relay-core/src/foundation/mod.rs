//! Foundation layer - errors, type descriptors and erased values.
//!
//! Everything above this layer speaks in terms of:
//! - [`DispatchError`] for every failure, including cancellation
//! - [`TypeKey`] / [`Key`] for variance matching
//! - [`AnyValue`] for results whose type is only known to the caller

pub mod error;
pub mod types;
pub mod value;

pub use error::{DispatchError, DispatchResult, ErrorSource};
pub use types::{Bindings, Key, Payload, TypeKey, TypeParam, Typed, unify};
pub use value::{AnyValue, AsAny, downcast, erase};
