//! Work items and the ids that identify them.

pub(crate) mod id;
pub use id::{BarrierToken, HandlerId, IdleHandlerId, LooperId, Seq};

pub(crate) mod item;
pub use item::{MAX_DELAY, SharedCallback, Tag, WorkItem};
pub(crate) use item::{Target, relative_ms};
