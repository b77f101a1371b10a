//! Running a method through its filters.

use std::sync::Arc;

use super::Filter;
use crate::callback::Callback;
use crate::foundation::DispatchResult;
use crate::handler::Handler;
use crate::policy::{MethodDescriptor, Reply};

/// The innermost step of a pipeline: the method call itself.
pub type Terminal<'a> = dyn Fn(&dyn Callback, &dyn Handler) -> DispatchResult<Reply> + 'a;

/// The rest of a pipeline, as seen by one filter.
///
/// Consumed by [`proceed`](Next::proceed), so a filter continues at most
/// once. Dropping it without proceeding short-circuits the pipeline.
pub struct Next<'a> {
    filters: &'a [Arc<dyn Filter>],
    callback: &'a dyn Callback,
    method: &'a MethodDescriptor,
    composer: &'a dyn Handler,
    terminal: &'a Terminal<'a>,
}

impl<'a> Next<'a> {
    /// Continues with the callback this filter received.
    pub fn proceed(self) -> DispatchResult<Reply> {
        let callback = self.callback;
        self.proceed_with(callback)
    }

    /// Continues with a replacement callback.
    pub fn proceed_with(self, callback: &dyn Callback) -> DispatchResult<Reply> {
        match self.filters.split_first() {
            Some((filter, rest)) => filter.next(
                callback,
                Next {
                    filters: rest,
                    callback,
                    method: self.method,
                    composer: self.composer,
                    terminal: self.terminal,
                },
            ),
            None => (self.terminal)(callback, self.composer),
        }
    }

    /// Declines without running the rest of the pipeline.
    pub fn abort(self) -> DispatchResult<Reply> {
        Ok(Reply::Skip)
    }

    /// The method at the end of the pipeline.
    pub fn method(&self) -> &'a MethodDescriptor {
        self.method
    }

    /// The outermost handler of the dispatch.
    pub fn composer(&self) -> &'a dyn Handler {
        self.composer
    }

    /// Number of filters still ahead, excluding the method.
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// Runs `filters` around `terminal`, the first filter outermost.
///
/// `filters` must already be in pipeline order.
pub fn invoke(
    callback: &dyn Callback,
    method: &MethodDescriptor,
    composer: &dyn Handler,
    filters: &[Arc<dyn Filter>],
    terminal: &Terminal<'_>,
) -> DispatchResult<Reply> {
    Next {
        filters,
        callback,
        method,
        composer,
        terminal,
    }
    .proceed()
}

