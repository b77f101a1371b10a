use std::sync::Arc;

use super::Context;
use crate::callback::Callback;
use crate::foundation::DispatchResult;
use crate::graph::Axis;
use crate::handler::Handler;

/// Dispatches through a context along a fixed [`Axis`].
///
/// Created by [`Context::axis`].
pub struct AxisHandler {
    context: Arc<Context>,
    axis: Axis,
}

impl AxisHandler {
    pub(super) fn new(context: Arc<Context>, axis: Axis) -> Self {
        Self { context, axis }
    }

    /// The context dispatch starts from.
    pub fn context(&self) -> &Arc<Context> {
        &self.context
    }

    /// The axis walked.
    pub fn axis(&self) -> Axis {
        self.axis
    }
}

impl Handler for AxisHandler {
    fn handle_callback(
        &self,
        callback: &dyn Callback,
        greedy: bool,
        composer: &dyn Handler,
    ) -> DispatchResult<bool> {
        self.context
            .handle_axis(self.axis, callback, greedy, composer)
    }
}

impl std::fmt::Debug for AxisHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AxisHandler")
            .field("context", &self.context.id())
            .field("axis", &self.axis)
            .finish()
    }
}
