//! Error types shared by every dispatch component.
//!
//! Settled promises hand the same error to each continuation, so
//! [`DispatchError`] is `Clone`; foreign error sources are kept behind an
//! [`Arc`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed foreign error carried by [`DispatchError::MethodFault`].
pub type ErrorSource = Arc<dyn std::error::Error + Send + Sync + 'static>;

// =============================================================================
// Dispatch Errors
// =============================================================================

/// Errors surfaced by dispatch, promises, filters and context trees.
#[derive(Debug, Clone, Error)]
pub enum DispatchError {
    /// A strict policy found no method able to service the callback.
    #[error("callback not handled: {callback}")]
    NotHandled {
        /// Description of the unhandled callback.
        callback: String,
    },

    /// A required filter could not be resolved for a method.
    #[error("required filter unavailable for '{method}': {reason}")]
    FilterAborted {
        /// The method whose pipeline could not be assembled.
        method: String,
        /// Why assembly failed.
        reason: String,
    },

    /// A matched method or one of its filters failed.
    #[error("method '{method}' failed: {source}")]
    MethodFault {
        /// Name of the failing method, empty when unknown.
        method: String,
        /// The underlying failure.
        #[source]
        source: ErrorSource,
    },

    /// The operation was cancelled.
    #[error("operation cancelled: {reason}")]
    Cancelled {
        /// Reason given at cancellation.
        reason: String,
    },

    /// A traversal visited the same node twice.
    #[error("circularity detected at node {node}")]
    Circularity {
        /// Debug rendering of the repeated node.
        node: String,
    },

    /// The context is no longer active.
    #[error("context has already ended")]
    ContextEnded,

    /// A value did not have the expected type.
    #[error("type mismatch: expected '{expected}', found '{found}'")]
    TypeMismatch {
        /// The expected type name.
        expected: String,
        /// The type actually found.
        found: String,
    },

    /// A promise did not settle in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Application-defined failure.
    #[error("{0}")]
    Custom(String),
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Plain-message error used to carry `Custom` failures into `MethodFault`.
#[derive(Debug, Error)]
#[error("{0}")]
struct Message(String);

impl DispatchError {
    /// Creates an application-defined error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    /// Wraps a foreign error as a method fault.
    pub fn fault<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::MethodFault {
            method: String::new(),
            source: Arc::new(err),
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::Cancelled {
            reason: reason.into(),
        }
    }

    /// Creates a not-handled error for the described callback.
    pub fn not_handled(callback: impl Into<String>) -> Self {
        Self::NotHandled {
            callback: callback.into(),
        }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Returns `true` for cancellation, which is never an application failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// Returns `true` if no method serviced the callback.
    pub fn is_not_handled(&self) -> bool {
        matches!(self, Self::NotHandled { .. })
    }

    /// Attributes the error to `method`.
    ///
    /// `Custom` and anonymous faults become `MethodFault`s naming the method;
    /// every other variant is returned unchanged.
    pub fn in_method(self, method: &str) -> Self {
        match self {
            Self::Custom(msg) => Self::MethodFault {
                method: method.to_string(),
                source: Arc::new(Message(msg)),
            },
            Self::MethodFault { method: m, source } if m.is_empty() => Self::MethodFault {
                method: method.to_string(),
                source,
            },
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_method_attributes_custom() {
        let err = DispatchError::custom("boom").in_method("feed");
        match &err {
            DispatchError::MethodFault { method, source } => {
                assert_eq!(method, "feed");
                assert_eq!(source.to_string(), "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(err.to_string(), "method 'feed' failed: boom");
    }

    #[test]
    fn test_in_method_keeps_cancellation() {
        let err = DispatchError::cancelled("stop").in_method("feed");
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_fault_keeps_named_method() {
        let err = DispatchError::fault(std::io::Error::other("disk"))
            .in_method("first")
            .in_method("second");
        match err {
            DispatchError::MethodFault { method, .. } => assert_eq!(method, "first"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
