use crate::queue::TaskQueue;
use crate::runtime::{Looper, registry};
use crate::task::{HandlerId, SharedCallback, Tag, Target, WorkItem};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Posts work to one [`Looper`] and cancels what it posted.
///
/// Every item a handler posts is labelled with the handler's identity, so
/// [`Handler::remove_all`] only ever touches its own items even when several
/// handlers share a looper. Handlers are cheap to clone; clones share the same
/// identity.
#[derive(Clone)]
pub struct Handler {
    looper: Looper,
    target: Target,
    urgent: bool,
}

impl Handler {
    pub fn new(looper: &Looper) -> Self {
        Self::build(looper, false)
    }

    /// A handler whose posts are never stalled by a barrier.
    pub fn new_urgent(looper: &Looper) -> Self {
        Self::build(looper, true)
    }

    /// Handler for the calling thread's looper.
    ///
    /// # Panics
    ///
    /// If no looper was prepared on this thread.
    #[track_caller]
    pub fn current() -> Self {
        Self::new(&registry::my_looper())
    }

    fn build(looper: &Looper, urgent: bool) -> Self {
        Self {
            looper: looper.clone(),
            target: Target {
                id: HandlerId::next(),
                name: Arc::from("Handler"),
            },
            urgent,
        }
    }

    /// Name shown in dispatch logs and dumps. Keeps the handler's identity.
    pub fn with_name(mut self, name: impl AsRef<str>) -> Self {
        self.target.name = Arc::from(name.as_ref());
        self
    }

    pub fn id(&self) -> HandlerId {
        self.target.id
    }

    pub fn looper(&self) -> &Looper {
        &self.looper
    }

    fn queue(&self) -> &TaskQueue {
        self.looper.queue()
    }

    fn label(&self, item: WorkItem) -> WorkItem {
        let item = item.with_target(self.target.clone());
        if self.urgent { item.urgent() } else { item }
    }

    fn send(&self, item: WorkItem) -> bool {
        self.queue().enqueue(self.label(item))
    }

    pub fn post<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(WorkItem::new(f))
    }

    pub fn post_delayed<F>(&self, f: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(WorkItem::new(f).delayed(delay))
    }

    pub fn post_at_time<F>(&self, f: F, due: Instant) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(WorkItem::new(f).at(due))
    }

    /// Runs `f` before anything else pending, barriers included.
    pub fn post_at_front<F>(&self, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.queue().enqueue_at_front(self.label(WorkItem::new(f)))
    }

    pub fn post_tagged<F>(&self, tag: impl Into<Tag>, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(WorkItem::new(f).with_tag(tag))
    }

    pub fn post_tagged_delayed<F>(&self, tag: impl Into<Tag>, f: F, delay: Duration) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.send(WorkItem::new(f).with_tag(tag).delayed(delay))
    }

    pub fn post_shared(&self, callback: &SharedCallback) -> bool {
        self.send(WorkItem::shared(callback))
    }

    pub fn post_shared_delayed(&self, callback: &SharedCallback, delay: Duration) -> bool {
        self.send(WorkItem::shared(callback).delayed(delay))
    }

    /// Cancels this handler's pending items carrying `tag`.
    pub fn remove_callbacks(&self, tag: &Tag) -> usize {
        self.queue().cancel_by_target_and_tag(self.target.id, tag)
    }

    /// Cancels this handler's pending posts of `callback`.
    pub fn remove_shared(&self, callback: &SharedCallback) -> usize {
        let id = self.target.id;
        self.queue()
            .remove_where(|item| item.target_id() == Some(id) && item.is_callback(callback))
    }

    pub fn remove_all(&self) -> usize {
        self.queue().cancel_by_target(self.target.id)
    }

    pub fn has_callbacks(&self, tag: &Tag) -> bool {
        let id = self.target.id;
        self.queue()
            .any_where(|item| item.target_id() == Some(id) && item.tag() == Some(tag))
    }

    pub fn has_shared(&self, callback: &SharedCallback) -> bool {
        let id = self.target.id;
        self.queue()
            .any_where(|item| item.target_id() == Some(id) && item.is_callback(callback))
    }

    pub fn has_pending(&self) -> bool {
        self.queue().has_target(self.target.id)
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("target", &self.target.to_string())
            .field("looper", &self.looper.id())
            .field("urgent", &self.urgent)
            .finish()
    }
}
