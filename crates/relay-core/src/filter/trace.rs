//! A filter logging method invocations.
//!
//! Install it per handler with `with_filters(Filters::of(TracingFilter::new()))`
//! or for the whole runtime through `dispatch.trace_methods`.

use std::time::{Duration, Instant};

use tracing::{Level, debug, span, trace, warn};

use super::{Filter, Next};
use crate::callback::Callback;
use crate::foundation::DispatchResult;
use crate::policy::Reply;

/// Records each method invocation and its outcome.
///
/// Runs outermost by default, so the recorded time covers every other
/// filter. Pending replies are logged again once they settle.
#[derive(Debug, Clone, Copy)]
pub struct TracingFilter {
    order: Option<i32>,
}

impl TracingFilter {
    /// A tracing filter running before every ordered filter.
    pub fn new() -> Self {
        Self {
            order: Some(i32::MIN),
        }
    }

    /// Places the filter at `order`.
    pub fn with_order(order: i32) -> Self {
        Self { order: Some(order) }
    }
}

impl Default for TracingFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Whole microseconds in `elapsed`, saturating at `u64::MAX`.
fn micros(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX)
}

impl Filter for TracingFilter {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn next(&self, callback: &dyn Callback, next: Next<'_>) -> DispatchResult<Reply> {
        let method = next.method().name().to_string();
        let span = span!(
            Level::DEBUG,
            "method",
            method = %method,
            callback = %callback.describe()
        );
        let _enter = span.enter();

        let started = Instant::now();
        let reply = next.proceed();
        let elapsed_us = micros(started.elapsed());
        match &reply {
            Ok(Reply::Skip) => trace!(elapsed_us, "method declined"),
            Ok(Reply::Pending(promise)) => {
                debug!(elapsed_us, "method returned pending result");
                promise.on_settled(move |outcome| match outcome {
                    Ok(_) => debug!(method = %method, "pending result resolved"),
                    Err(e) if e.is_cancelled() => debug!(method = %method, "pending result cancelled"),
                    Err(e) => warn!(method = %method, error = %e, "pending result rejected"),
                });
            }
            Ok(_) => debug!(elapsed_us, "method completed"),
            Err(e) => warn!(elapsed_us, error = %e, "method failed"),
        }
        reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::Command;
    use crate::filter::Filters;
    use crate::foundation::Typed;
    use crate::handler::{HandlerExt, HandlerRefExt, Leaf};
    use crate::policy::{Describe, DescriptorBuilder, Invocation};
    use crate::promise::Promise;

    struct Slow;
    impl Typed for Slow {}

    struct Worker;

    impl Describe for Worker {
        fn describe(d: &mut DescriptorBuilder<Self>) {
            d.handles(|_: &Self, _: &Slow, _: &Invocation<'_>| Promise::resolved(5u32));
        }
    }

    #[test]
    fn test_tracing_filter_is_transparent() {
        let handler = Leaf::new(Worker)
            .into_ref()
            .with_filters(Filters::of(TracingFilter::new()));
        let value: u32 = handler.command(Slow).unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_elapsed_micros_saturate() {
        assert_eq!(micros(Duration::from_millis(3)), 3_000);
        assert_eq!(micros(Duration::MAX), u64::MAX);
    }
}
