use crate::task::IdleHandlerId;
use std::sync::Arc;

/// Callback invoked on the loop thread when its queue runs out of due work and
/// is about to block.
///
/// Idle handlers run at most once per call to
/// [`TaskQueue::next`](crate::queue::TaskQueue::next), outside the queue lock,
/// so they may freely post new items.
pub trait IdleHandler: Send + Sync {
    /// Return `false` to unregister the handler.
    fn queue_idle(&self) -> bool;
}

impl<F> IdleHandler for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn queue_idle(&self) -> bool {
        self()
    }
}

pub(crate) type IdleHandlers = Vec<(IdleHandlerId, Arc<dyn IdleHandler>)>;

/// Runs a snapshot of the registered handlers and returns the ids of those
/// that asked to be removed.
pub(crate) fn run_idle_handlers(handlers: IdleHandlers) -> Vec<IdleHandlerId> {
    handlers
        .into_iter()
        .filter_map(|(id, handler)| (!handler.queue_idle()).then_some(id))
        .collect()
}
