use super::slot::Slot;
use super::{Callback, Response};
use crate::foundation::{AnyValue, DispatchResult, Key, Typed, downcast};
use crate::policy::Policy;
use crate::promise::Promise;

/// Asks methods registered under [`Policy::provides`] for a value of a key.
pub struct Inquiry {
    key: Key,
    slot: Slot,
}

impl Inquiry {
    /// Inquires about `key`; the first provider wins.
    pub fn new(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            slot: Slot::new(false),
        }
    }

    /// Inquires about `key`, collecting every provider's value.
    pub fn many(key: impl Into<Key>) -> Self {
        Self {
            key: key.into(),
            slot: Slot::new(true),
        }
    }

    /// Inquires about the Rust type `T`.
    pub fn of<T: Typed>() -> Self {
        Self::new(Key::of::<T>())
    }

    /// The requested key.
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Returns `true` for inquiries built with [`Inquiry::many`].
    pub fn is_many(&self) -> bool {
        self.slot.is_many()
    }

    /// Returns `true` if any provider's value is still pending.
    pub fn is_async(&self) -> bool {
        self.slot.is_async()
    }

    /// Provider responses received so far.
    pub fn resolutions(&self) -> Vec<Response> {
        self.slot.responses()
    }

    /// The first provider's value as a promise.
    pub fn result(&self) -> Option<Promise<AnyValue>> {
        self.slot.first().map(Response::into_promise)
    }

    /// Every provider's value in dispatch order.
    pub fn results(&self) -> Promise<Vec<AnyValue>> {
        self.slot.values()
    }

    /// Values already available, downcast to `T`.
    ///
    /// Pending resolutions and values of another type are skipped. A value
    /// that is itself a `Vec<T>` is flattened into the result.
    pub fn ready<T: Clone + Send + Sync + 'static>(&self) -> Vec<T> {
        let mut values = Vec::new();
        for response in self.slot.responses() {
            let Response::Value(value) = response else {
                continue;
            };
            if let Ok(one) = downcast::<T>(&value) {
                values.push(one);
            } else if let Ok(list) = downcast::<Vec<T>>(&value) {
                values.extend(list);
            }
        }
        values
    }

    /// Every provider's value downcast to `T`, flattening `Vec<T>` values.
    pub fn results_as<T: Clone + Send + Sync + 'static>(&self) -> Promise<Vec<T>> {
        self.results().then(|values| {
            let mut out = Vec::with_capacity(values.len());
            for value in &values {
                match downcast::<T>(value) {
                    Ok(one) => out.push(one),
                    Err(e) => out.extend(downcast::<Vec<T>>(value).map_err(|_| e)?),
                }
            }
            DispatchResult::Ok(out)
        })
    }
}

impl Callback for Inquiry {
    fn policy(&self) -> &Policy {
        Policy::provides()
    }

    fn respond(&self, response: Response) -> bool {
        self.slot.offer(response)
    }

    fn pending(&self) -> Option<Promise<AnyValue>> {
        self.slot.pending()
    }

    fn describe(&self) -> String {
        format!("inquiry {}", self.key)
    }
}

impl std::fmt::Debug for Inquiry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inquiry")
            .field("key", &self.key)
            .field("many", &self.slot.is_many())
            .field("resolutions", &self.slot.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::erase;

    #[test]
    fn test_ready_flattens_lists() {
        let inquiry = Inquiry::many(Key::name("ports"));
        inquiry.respond(Response::Value(erase(80u32)));
        inquiry.respond(Response::Value(erase(vec![443u32, 8080])));
        inquiry.respond(Response::Value(erase("not a port".to_string())));
        assert_eq!(inquiry.ready::<u32>(), [80, 443, 8080]);
    }

    #[test]
    fn test_results_as_rejects_foreign_values() {
        let inquiry = Inquiry::many(Key::name("ports"));
        inquiry.respond(Response::Value(erase(80u32)));
        assert_eq!(inquiry.results_as::<u32>().wait().unwrap(), [80]);

        inquiry.respond(Response::Value(erase(true)));
        assert!(inquiry.results_as::<u32>().wait().is_err());
    }

    #[test]
    fn test_single_inquiry_keeps_first() {
        let inquiry = Inquiry::of::<String>();
        assert!(inquiry.respond(Response::Value(erase("a".to_string()))));
        assert!(!inquiry.respond(Response::Value(erase("b".to_string()))));
        assert_eq!(inquiry.ready::<String>(), ["a".to_string()]);
    }
}
