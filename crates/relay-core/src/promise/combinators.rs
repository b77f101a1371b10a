//! Aggregation, timing and bridging operators for [`Promise`].

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{CancelMode, Promise, Shared};
use crate::foundation::{DispatchError, DispatchResult};

fn cancel_all<T: Clone>(inputs: &[Weak<Shared<T>>]) {
    for input in inputs.iter().filter_map(Weak::upgrade) {
        input.settle(Err(DispatchError::cancelled("sibling settled")));
    }
}

/// A call scheduled by [`schedule`].
enum Timer {
    Task(CancellationToken),
    Thread(Arc<(Mutex<bool>, Condvar)>),
}

impl Timer {
    /// Drops the call if it has not run yet.
    fn cancel(&self) {
        match self {
            Self::Task(token) => token.cancel(),
            Self::Thread(signal) => {
                *signal.0.lock() = true;
                signal.1.notify_all();
            }
        }
    }
}

/// Runs `f` after `delay` on the current Tokio runtime, or on a helper
/// thread when no runtime is running.
fn schedule<F>(delay: Duration, f: F) -> Arc<Timer>
where
    F: FnOnce() + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let token = CancellationToken::new();
            let guard = token.clone();
            handle.spawn(async move {
                if guard
                    .run_until_cancelled(tokio::time::sleep(delay))
                    .await
                    .is_some()
                {
                    f();
                }
            });
            Arc::new(Timer::Task(token))
        }
        Err(_) => {
            let signal = Arc::new((Mutex::new(false), Condvar::new()));
            let waiter = signal.clone();
            std::thread::spawn(move || {
                let deadline = Instant::now() + delay;
                let mut cancelled = waiter.0.lock();
                while !*cancelled {
                    if waiter.1.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                if !*cancelled {
                    drop(cancelled);
                    f();
                }
            });
            Arc::new(Timer::Thread(signal))
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Resolves with every input's value, in input order.
    ///
    /// Rejects as soon as any input rejects or is cancelled, cancelling the
    /// inputs still pending. Cancelling the aggregate cancels every input.
    pub fn all(promises: impl IntoIterator<Item = Promise<T>>) -> Promise<Vec<T>> {
        let promises: Vec<Promise<T>> = promises.into_iter().collect();
        if promises.is_empty() {
            return Promise::resolved(Vec::new());
        }

        let (all, resolver) = Promise::<Vec<T>>::with_mode(CancelMode::Any);
        let inputs: Arc<Vec<Weak<Shared<T>>>> =
            Arc::new(promises.iter().map(|p| Arc::downgrade(&p.shared)).collect());
        {
            let inputs = inputs.clone();
            resolver.on_cancel(move || cancel_all(&inputs));
        }

        let total = promises.len();
        let slots: Arc<Mutex<(Vec<Option<T>>, usize)>> =
            Arc::new(Mutex::new((vec![None; total], 0)));

        for (index, promise) in promises.iter().enumerate() {
            let slots = slots.clone();
            let resolver = resolver.clone();
            let inputs = inputs.clone();
            promise.on_settled(move |outcome| match outcome {
                Ok(value) => {
                    let complete = {
                        let mut guard = slots.lock();
                        guard.0[index] = Some(value.clone());
                        guard.1 += 1;
                        (guard.1 == total)
                            .then(|| guard.0.iter_mut().filter_map(Option::take).collect())
                    };
                    if let Some(values) = complete {
                        resolver.resolve(values);
                    }
                }
                Err(e) => {
                    if resolver.reject(e.clone()) {
                        trace!(index, error = %e, "aggregate settled by failing input");
                        cancel_all(&inputs);
                    }
                }
            });
        }
        all
    }

    /// Settles with the first input to settle.
    ///
    /// An empty input never settles. The losing inputs are left running once
    /// the race has settled; only cancelling the race itself cancels every
    /// input.
    pub fn race(promises: impl IntoIterator<Item = Promise<T>>) -> Promise<T> {
        let promises: Vec<Promise<T>> = promises.into_iter().collect();
        let (race, resolver) = Promise::with_mode(CancelMode::Any);
        let inputs: Vec<Weak<Shared<T>>> = promises.iter().map(|p| Arc::downgrade(&p.shared)).collect();
        resolver.on_cancel(move || cancel_all(&inputs));

        for promise in &promises {
            let resolver = resolver.clone();
            promise.on_settled(move |outcome| {
                resolver.settle(outcome.clone());
            });
        }
        race
    }

    /// Rejects with [`DispatchError::Timeout`] if the promise has not
    /// settled within `duration`, then cancels it.
    ///
    /// The timer stops once the promise settles or the result is cancelled.
    pub fn timeout(&self, duration: Duration) -> Promise<T> {
        let (child, resolver) = self.derive();
        {
            let resolver = resolver.clone();
            self.on_settled(move |outcome| {
                resolver.settle(outcome.clone());
            });
        }
        let source = Arc::downgrade(&self.shared);
        let timer = {
            let resolver = resolver.clone();
            schedule(duration, move || {
                if resolver.reject(DispatchError::Timeout(duration))
                    && let Some(source) = source.upgrade()
                {
                    source.settle(Err(DispatchError::cancelled("timed out")));
                }
            })
        };
        {
            let timer = timer.clone();
            resolver.on_cancel(move || timer.cancel());
        }
        self.on_settled(move |_| timer.cancel());
        child
    }

    /// Bridges a Rust future into a promise.
    ///
    /// The future is spawned on the current Tokio runtime, or driven on a
    /// helper thread when none is running. Cancelling the promise aborts the
    /// spawned task.
    pub fn from_future<F>(future: F) -> Promise<T>
    where
        F: Future<Output = DispatchResult<T>> + Send + 'static,
    {
        let (promise, resolver) = Promise::pending();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let settle = resolver.clone();
                let task = handle.spawn(async move {
                    settle.settle(future.await);
                });
                resolver.on_cancel(move || task.abort());
            }
            Err(_) => {
                std::thread::spawn(move || {
                    resolver.settle(futures::executor::block_on(future));
                });
            }
        }
        promise
    }
}

impl Promise<()> {
    /// Resolves after `duration`.
    ///
    /// Cancelling the promise stops its timer.
    pub fn delay(duration: Duration) -> Promise<()> {
        let (promise, resolver) = Promise::pending();
        let timer = {
            let resolver = resolver.clone();
            schedule(duration, move || {
                resolver.resolve(());
            })
        };
        resolver.on_cancel(move || timer.cancel());
        promise
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::promise::PromiseState;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_all_preserves_input_order() {
        let (a, ra) = Promise::<u32>::pending();
        let (b, rb) = Promise::<u32>::pending();
        let (c, rc) = Promise::<u32>::pending();
        let all = Promise::all([a, b, c]);

        rc.resolve(3);
        ra.resolve(1);
        assert!(all.is_pending());
        rb.resolve(2);
        assert_eq!(all.wait().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn test_all_rejects_and_cancels_siblings() {
        let (a, ra) = Promise::<u32>::pending();
        let (b, _rb) = Promise::<u32>::pending();
        let all = Promise::all([a, b.clone()]);

        ra.reject(DispatchError::custom("first failure"));
        assert_eq!(all.state(), PromiseState::Rejected);
        assert_eq!(b.state(), PromiseState::Cancelled);
    }

    #[test]
    fn test_cancelling_all_cancels_inputs() {
        let (a, _ra) = Promise::<u32>::pending();
        let (b, _rb) = Promise::<u32>::pending();
        let all = Promise::all([a.clone(), b.clone()]);

        all.cancel();
        assert_eq!(a.state(), PromiseState::Cancelled);
        assert_eq!(b.state(), PromiseState::Cancelled);
    }

    #[test]
    fn test_all_of_nothing_resolves_empty() {
        assert!(Promise::<u32>::all([]).wait().unwrap().is_empty());
    }

    #[test]
    fn test_race_takes_first_settlement() {
        let (a, _ra) = Promise::<u32>::pending();
        let (b, rb) = Promise::<u32>::pending();
        let race = Promise::race([a.clone(), b]);
        rb.resolve(2);
        assert_eq!(race.wait().unwrap(), 2);
        assert!(a.is_pending());
    }

    #[tokio::test]
    async fn test_timeout_rejects_and_cancels_source() {
        let (source, _resolver) = Promise::<u32>::pending();
        let limited = source.timeout(Duration::from_millis(10));
        let err = limited.await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout(_)));
        assert_eq!(source.state(), PromiseState::Cancelled);
    }

    #[tokio::test]
    async fn test_timeout_passes_fast_results() {
        let limited = Promise::resolved(1u32).timeout(Duration::from_secs(5));
        assert_eq!(limited.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_from_future_and_abort() {
        let value = Promise::from_future(async { Ok::<_, DispatchError>(5u32) });
        assert_eq!(value.await.unwrap(), 5);

        let never = Promise::<u32>::from_future(futures::future::pending());
        never.cancel();
        assert_eq!(never.state(), PromiseState::Cancelled);
    }

    #[tokio::test]
    async fn test_delay_resolves() {
        Promise::delay(Duration::from_millis(1)).await.unwrap();
    }

    fn flag() -> (Arc<AtomicBool>, impl FnOnce() + Send + 'static) {
        let fired = Arc::new(AtomicBool::new(false));
        let set = fired.clone();
        (fired, move || set.store(true, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_cancelled_task_timer_never_fires() {
        let (fired, f) = flag();
        let timer = schedule(Duration::from_millis(10), f);
        timer.cancel();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!fired.load(Ordering::SeqCst));

        let (fired, f) = flag();
        let _timer = schedule(Duration::from_millis(1), f);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_thread_timer_never_fires() {
        let (fired, f) = flag();
        let timer = schedule(Duration::from_millis(10), f);
        timer.cancel();
        std::thread::sleep(Duration::from_millis(30));
        assert!(!fired.load(Ordering::SeqCst));

        let (fired, f) = flag();
        let _timer = schedule(Duration::from_millis(1), f);
        std::thread::sleep(Duration::from_millis(30));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelling_delay_outside_runtime() {
        let delay = Promise::delay(Duration::from_millis(5));
        assert!(delay.cancel());
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(delay.state(), PromiseState::Cancelled);
    }
}
