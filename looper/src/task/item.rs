use crate::task::{HandlerId, Seq};
use std::fmt;
use std::fmt::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Longest delay [`WorkItem::delayed`] honors.
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Identifying tag attached to a [`WorkItem`]. Used to cancel groups of items
/// and to label them in logs and dumps.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct Tag(Arc<str>);

impl Tag {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(Arc::from(tag.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(tag: &str) -> Self {
        Tag::new(tag)
    }
}

impl From<String> for Tag {
    fn from(tag: String) -> Self {
        Self(Arc::from(tag))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A callback that can be posted many times and cancelled by identity.
///
/// Two `SharedCallback`s are the same callback only if one was cloned from the
/// other: comparison is by pointer, never by behavior.
#[derive(Clone)]
pub struct SharedCallback(Arc<dyn Fn() + Send + Sync + 'static>);

impl SharedCallback {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    pub fn ptr_eq(&self, other: &SharedCallback) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.0) as *const ()
    }
}

impl fmt::Debug for SharedCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedCallback@{:p}", self.addr())
    }
}

pub(crate) type OnceCallback = Box<dyn FnOnce() + Send + 'static>;

pub(crate) enum Callback {
    Once(OnceCallback),
    Shared(SharedCallback),
}

impl Callback {
    fn run(self) {
        match self {
            Callback::Once(f) => f(),
            Callback::Shared(f) => (f.0)(),
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callback::Once(_) => f.write_str("closure"),
            Callback::Shared(shared) => shared.fmt(f),
        }
    }
}

/// Identity of the [`Handler`](crate::runtime::Handler) that posted an item.
#[derive(Clone, Debug)]
pub(crate) struct Target {
    pub(crate) id: HandlerId,
    pub(crate) name: Arc<str>,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

/// Unit of deferred, time-ordered work.
///
/// A `WorkItem` is built by the producer, handed over to a
/// [`TaskQueue`](crate::queue::TaskQueue) which owns it until it is either
/// returned by `next()` or cancelled, and consumed by [`WorkItem::run`].
pub struct WorkItem {
    pub(crate) due: Instant,

    /// Assigned on insertion.
    pub(crate) seq: Seq,

    pub(crate) callback: Callback,

    pub(crate) tag: Option<Tag>,

    pub(crate) target: Option<Target>,

    /// Urgent items are never stalled by a barrier.
    pub(crate) urgent: bool,
}

impl WorkItem {
    /// Creates an item due immediately.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::from_callback(Callback::Once(Box::new(f)))
    }

    /// Creates an item running a clone of `callback`, due immediately.
    pub fn shared(callback: &SharedCallback) -> Self {
        Self::from_callback(Callback::Shared(callback.clone()))
    }

    fn from_callback(callback: Callback) -> Self {
        Self {
            due: Instant::now(),
            seq: Seq::UNASSIGNED,
            callback,
            tag: None,
            target: None,
            urgent: false,
        }
    }

    pub fn at(mut self, due: Instant) -> Self {
        self.due = due;
        self
    }

    /// Due `delay` from now. Delays past [`MAX_DELAY`] are clamped to it, so
    /// the item stays queued and never comes due.
    pub fn delayed(mut self, delay: Duration) -> Self {
        let now = Instant::now();
        self.due = now
            .checked_add(delay)
            .filter(|due| *due <= now + MAX_DELAY)
            .unwrap_or(now + MAX_DELAY);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Tag>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn urgent(mut self) -> Self {
        self.urgent = true;
        self
    }

    pub(crate) fn with_target(mut self, target: Target) -> Self {
        self.target = Some(target);
        self
    }

    pub fn due(&self) -> Instant {
        self.due
    }

    pub fn seq(&self) -> Seq {
        self.seq
    }

    pub fn tag(&self) -> Option<&Tag> {
        self.tag.as_ref()
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    pub fn target_id(&self) -> Option<HandlerId> {
        self.target.as_ref().map(|t| t.id)
    }

    /// Executes the payload, consuming the item.
    pub fn run(self) {
        self.callback.run();
    }

    pub(crate) fn is_callback(&self, callback: &SharedCallback) -> bool {
        matches!(&self.callback, Callback::Shared(c) if c.ptr_eq(callback))
    }

    pub(crate) fn target_label(&self) -> String {
        self.target
            .as_ref()
            .map_or_else(|| "<queue>".to_string(), |t| t.to_string())
    }

    pub(crate) fn callback_label(&self) -> String {
        format!("{:?}", self.callback)
    }

    pub(crate) fn tag_label(&self) -> &str {
        self.tag.as_ref().map_or("-", |t| t.as_str())
    }

    /// One line description relative to `now`, e.g.
    /// `{ when=-3ms seq=7 callback=closure target=net#2 tag=refresh }`.
    pub(crate) fn describe(&self, now: Instant) -> String {
        let mut out = format!(
            "{{ when={} seq={} callback={:?}",
            relative_ms(self.due, now),
            self.seq,
            self.callback
        );

        if let Some(target) = &self.target {
            let _ = write!(out, " target={target}");
        }
        if let Some(tag) = &self.tag {
            let _ = write!(out, " tag={tag}");
        }
        if self.urgent {
            out.push_str(" urgent");
        }

        out.push_str(" }");
        out
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("seq", &self.seq)
            .field("callback", &self.callback)
            .field("tag", &self.tag)
            .field("target", &self.target)
            .field("urgent", &self.urgent)
            .finish_non_exhaustive()
    }
}

/// Signed distance from `now` to `at` in milliseconds, formatted like `+12ms`
/// or `-3ms`.
pub(crate) fn relative_ms(at: Instant, now: Instant) -> String {
    if at >= now {
        format!("+{}ms", at.duration_since(now).as_millis())
    } else {
        format!("-{}ms", now.duration_since(at).as_millis())
    }
}
