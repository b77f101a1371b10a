use super::slot::Slot;
use super::{Callback, Response};
use crate::foundation::{AnyValue, DispatchResult, Payload};
use crate::policy::Policy;
use crate::promise::Promise;

/// Carries a payload to methods registered under [`Policy::handles`].
///
/// By default the first method to respond supplies the result; a command
/// built with [`Command::many`] collects every response in dispatch order.
pub struct Command {
    payload: Box<dyn Payload>,
    slot: Slot,
}

impl Command {
    /// A command whose first response wins.
    pub fn new(payload: impl Payload + 'static) -> Self {
        Self {
            payload: Box::new(payload),
            slot: Slot::new(false),
        }
    }

    /// A command collecting every response.
    pub fn many(payload: impl Payload + 'static) -> Self {
        Self {
            payload: Box::new(payload),
            slot: Slot::new(true),
        }
    }

    /// The payload being dispatched.
    pub fn payload(&self) -> &dyn Payload {
        &*self.payload
    }

    /// Returns `true` for commands built with [`Command::many`].
    pub fn is_many(&self) -> bool {
        self.slot.is_many()
    }

    /// Responses received so far.
    pub fn responses(&self) -> Vec<Response> {
        self.slot.responses()
    }

    /// Returns `true` if any response is still pending.
    pub fn is_async(&self) -> bool {
        self.slot.is_async()
    }

    /// The first response as a promise, or `None` if no method responded.
    pub fn result(&self) -> Option<Promise<AnyValue>> {
        self.slot.first().map(Response::into_promise)
    }

    /// The first response's value, blocking if it is pending.
    pub fn value<T: Clone + Send + Sync + 'static>(&self) -> DispatchResult<Option<T>> {
        self.result()
            .map(|promise| promise.downcast::<T>().wait())
            .transpose()
    }

    /// Every response's value in dispatch order.
    pub fn results(&self) -> Promise<Vec<AnyValue>> {
        self.slot.values()
    }
}

impl Callback for Command {
    fn policy(&self) -> &Policy {
        Policy::handles()
    }

    fn respond(&self, response: Response) -> bool {
        self.slot.offer(response)
    }

    fn pending(&self) -> Option<Promise<AnyValue>> {
        self.slot.pending()
    }

    fn describe(&self) -> String {
        format!("command {}", self.payload.payload_key())
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("payload", &self.payload.payload_key())
            .field("many", &self.slot.is_many())
            .field("responses", &self.slot.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::{Typed, erase};

    struct Ping;
    impl Typed for Ping {}

    #[test]
    fn test_first_response_wins() {
        let command = Command::new(Ping);
        assert!(command.respond(Response::Value(erase(1u32))));
        assert!(!command.respond(Response::Value(erase(2u32))));
        assert_eq!(command.value::<u32>().unwrap(), Some(1));
    }

    #[test]
    fn test_many_collects_in_order() {
        let command = Command::many(Ping);
        let (late, resolver) = Promise::<AnyValue>::pending();
        command.respond(Response::Pending(late));
        command.respond(Response::Value(erase(2u32)));
        assert!(command.is_async());
        assert!(command.pending().is_some());

        let results = command.results();
        assert!(results.ptr_eq(&command.results()));
        resolver.resolve(erase(1u32));
        let values = results.wait().unwrap();
        let values: Vec<u32> = values
            .iter()
            .map(|v| *v.downcast_ref::<u32>().unwrap())
            .collect();
        assert_eq!(values, [1, 2]);
    }

    #[test]
    fn test_sync_command_has_no_pending_result() {
        let command = Command::new(Ping);
        assert!(command.pending().is_none());
        command.respond(Response::Value(erase(())));
        assert!(command.pending().is_none());
        assert!(command.describe().contains("Ping"));
    }
}
