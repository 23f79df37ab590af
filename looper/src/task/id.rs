use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position of an entry among entries sharing the same due time.
///
/// Regular insertions draw from an increasing counter starting at `1`, posts at
/// the front of the queue draw from a decreasing counter starting at `-1`. Both
/// counters are owned by a single [`TaskQueue`] and only advanced under its lock.
///
/// [`TaskQueue`]: crate::queue::TaskQueue
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Seq(pub(crate) i64);

impl Seq {
    /// Placeholder carried by a [`WorkItem`](crate::task::WorkItem) until it is
    /// inserted.
    pub(crate) const UNASSIGNED: Seq = Seq(0);

    pub(crate) const FIRST: Seq = Seq(1);

    pub(crate) const FIRST_FRONT: Seq = Seq(-1);

    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// Every process-unique id below follows the same recipe: a static counter
// starting at 1 and a cold panic if the u64 space ever wraps.
macro_rules! unique_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
        pub struct $name(NonZeroU64);

        impl $name {
            pub(crate) fn next() -> Self {
                static COUNTER: AtomicU64 = AtomicU64::new(1);

                let id = COUNTER.fetch_add(1, Ordering::Relaxed);

                // Safety: even at one billion ids per second it takes centuries
                // to wrap around.
                let Some(id) = NonZeroU64::new(id) else {
                    Self::exhausted();
                };

                Self(id)
            }

            #[cold]
            fn exhausted() -> ! {
                panic!(concat!("failed to generate unique ", $what, ": bitspace exhausted"))
            }

            pub fn as_u64(&self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

unique_id!(
    /// Token identifying one barrier posted with
    /// [`TaskQueue::post_barrier`](crate::queue::TaskQueue::post_barrier).
    /// Tokens are never reused, so at most one barrier per token can be pending.
    BarrierToken,
    "barrier token"
);

unique_id!(
    /// Identity of a [`Handler`](crate::runtime::Handler), used to scope
    /// cancellation to the items it posted.
    HandlerId,
    "handler id"
);

unique_id!(
    /// Identity of a [`Looper`](crate::runtime::Looper) for logs and dumps.
    LooperId,
    "looper id"
);

unique_id!(
    /// Returned by [`TaskQueue::add_idle_handler`](crate::queue::TaskQueue::add_idle_handler).
    IdleHandlerId,
    "idle handler id"
);
