//! Time-ordered queue of pending work shared between producers on any thread
//! and the single thread draining it.

use crate::errors::LooperError;
use crate::task::{
    BarrierToken, HandlerId, IdleHandlerId, Seq, SharedCallback, Tag, WorkItem, relative_ms,
};
use crate::trace::{PrefixPrinter, Printer};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace, warn};

mod idle;
pub use idle::IdleHandler;
use idle::{IdleHandlers, run_idle_handlers};


/// Dispatch order of an entry. Derived ordering compares `due` first, then
/// `seq`, which gives the total order every entry is stored in.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub(crate) struct Key {
    due: Instant,
    seq: Seq,
}

pub(crate) enum Entry {
    Work(WorkItem),
    Barrier(BarrierToken),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuitMode {
    /// Everything pending was discarded.
    Immediate,

    /// Items queued before the quit still drain.
    Safe,
}

struct State {
    entries: BTreeMap<Key, Entry>,

    /// Position of every pending barrier.
    barriers: HashMap<BarrierToken, Key>,

    next_seq: Seq,

    next_front_seq: Seq,

    quitting: Option<QuitMode>,

    /// The draining thread is parked on the condvar.
    blocked: bool,

    idle_handlers: IdleHandlers,
}

impl State {
    fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            barriers: HashMap::new(),
            next_seq: Seq::FIRST,
            next_front_seq: Seq::FIRST_FRONT,
            quitting: None,
            blocked: false,
            idle_handlers: Vec::new(),
        }
    }

    fn alloc_seq(&mut self) -> Seq {
        let seq = self.next_seq;
        self.next_seq = Seq(seq.0 + 1);
        seq
    }

    fn alloc_front_seq(&mut self) -> Seq {
        let seq = self.next_front_seq;
        self.next_front_seq = Seq(seq.0 - 1);
        seq
    }

    /// The entry `next()` would hand out once due. When a barrier is first in
    /// order, only urgent items behind it are eligible.
    fn candidate(&self) -> Option<Key> {
        let (head, entry) = self.entries.first_key_value()?;
        match entry {
            Entry::Work(_) => Some(*head),
            Entry::Barrier(_) => self.entries.range(*head..).find_map(|(key, entry)| match entry {
                Entry::Work(item) if item.urgent => Some(*key),
                _ => None,
            }),
        }
    }

    fn take_work(&mut self, key: &Key) -> Option<WorkItem> {
        match self.entries.remove(key)? {
            Entry::Work(item) => Some(item),
            Entry::Barrier(token) => {
                self.barriers.remove(&token);
                None
            }
        }
    }

    fn drain(&mut self) -> Vec<Entry> {
        self.barriers.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }

    fn remove_where<F>(&mut self, pred: F) -> Vec<WorkItem>
    where
        F: Fn(&WorkItem) -> bool,
    {
        let keys: Vec<Key> = self
            .entries
            .iter()
            .filter_map(|(key, entry)| match entry {
                Entry::Work(item) if pred(item) => Some(*key),
                _ => None,
            })
            .collect();

        keys.iter().filter_map(|key| self.take_work(key)).collect()
    }

    fn any_where<F>(&self, pred: F) -> bool
    where
        F: Fn(&WorkItem) -> bool,
    {
        self.entries.values().any(|entry| match entry {
            Entry::Work(item) => pred(item),
            Entry::Barrier(_) => false,
        })
    }
}

struct Shared {
    quit_allowed: bool,

    state: Mutex<State>,

    /// Signalled when the dispatch candidate changes while the draining thread
    /// is blocked, and when quitting begins.
    cond: Condvar,
}

/// Ordered holding area for the pending [`WorkItem`]s of one loop.
///
/// Any thread may insert, cancel, post barriers or quit. Exactly one thread, the
/// one owning the loop, is expected to call [`TaskQueue::next`].
///
/// Removed entries are always dropped after the lock is released since a
/// captured value's `Drop` may post back into this queue.
#[derive(Clone)]
pub struct TaskQueue(Arc<Shared>);

impl TaskQueue {
    pub fn new(quit_allowed: bool) -> Self {
        Self(Arc::new(Shared {
            quit_allowed,
            state: Mutex::new(State::new()),
            cond: Condvar::new(),
        }))
    }

    /// Inserts `item` at its `(due, seq)` position.
    ///
    /// Returns `false` and drops the item if the queue is quitting. This is an
    /// expected condition during shutdown, not an error.
    pub fn enqueue(&self, mut item: WorkItem) -> bool {
        let mut state = self.0.state.lock();
        if state.quitting.is_some() {
            drop(state);
            self.warn_dropped(&item);
            return false;
        }

        item.seq = state.alloc_seq();
        let key = Key {
            due: item.due,
            seq: item.seq,
        };
        self.insert_and_wake(&mut state, key, Entry::Work(item));
        true
    }

    /// Inserts `item` ahead of every pending entry, barriers included. The
    /// item's due time is moved to the earlier of now and the current head.
    pub fn enqueue_at_front(&self, mut item: WorkItem) -> bool {
        let mut state = self.0.state.lock();
        if state.quitting.is_some() {
            drop(state);
            self.warn_dropped(&item);
            return false;
        }

        let now = Instant::now();
        item.due = state
            .entries
            .first_key_value()
            .map_or(now, |(head, _)| head.due.min(now));
        item.seq = state.alloc_front_seq();

        let key = Key {
            due: item.due,
            seq: item.seq,
        };
        self.insert_and_wake(&mut state, key, Entry::Work(item));
        true
    }

    fn insert_and_wake(&self, state: &mut MutexGuard<'_, State>, key: Key, entry: Entry) {
        state.entries.insert(key, entry);
        if state.blocked && state.candidate() == Some(key) {
            self.0.cond.notify_one();
        }
    }

    fn warn_dropped(&self, item: &WorkItem) {
        warn!(
            target_handler = %item.target_label(),
            tag = item.tag_label(),
            "dropping work item posted to a quitting queue"
        );
    }

    /// Blocks until the next eligible item is due and returns it, or returns
    /// `None` once the queue is quitting and has nothing left to dispatch.
    ///
    /// Idle handlers run at most once per call, just before the first time the
    /// call would block.
    pub fn next(&self) -> Option<WorkItem> {
        let mut idle_pending = true;
        let mut state = self.0.state.lock();

        loop {
            if state.quitting == Some(QuitMode::Immediate) {
                return None;
            }

            let now = Instant::now();
            let deadline = match state.candidate() {
                Some(key) if key.due <= now => {
                    if let Some(item) = state.take_work(&key) {
                        trace!(seq = %item.seq, tag = item.tag_label(), "next item");
                        return Some(item);
                    }
                    continue;
                }
                Some(key) => Some(key.due),
                None => None,
            };

            // Draining ends once no work is left to wait for. Whatever is
            // still queued is stalled behind a barrier and will never run.
            if state.quitting == Some(QuitMode::Safe) && deadline.is_none() {
                let leftovers = state.drain();
                drop(state);
                if !leftovers.is_empty() {
                    debug!(discarded = leftovers.len(), "discarding stalled entries");
                }
                return None;
            }

            if idle_pending && !state.idle_handlers.is_empty() {
                idle_pending = false;
                let handlers = state.idle_handlers.clone();
                let finished = MutexGuard::unlocked(&mut state, || run_idle_handlers(handlers));
                state.idle_handlers.retain(|(id, _)| !finished.contains(id));

                // Handlers may have posted work, look again before blocking.
                continue;
            }
            idle_pending = false;

            state.blocked = true;
            match deadline {
                Some(deadline) => {
                    self.0.cond.wait_until(&mut state, deadline);
                }
                None => self.0.cond.wait(&mut state),
            }
            state.blocked = false;
        }
    }

    /// Posts a barrier at `due`. Non-urgent items ordered after it stall until
    /// [`TaskQueue::remove_barrier`] is called with the returned token.
    pub fn post_barrier(&self, due: Instant) -> BarrierToken {
        let token = BarrierToken::next();
        let mut state = self.0.state.lock();

        let key = Key {
            due,
            seq: state.alloc_seq(),
        };
        state.entries.insert(key, Entry::Barrier(token));
        state.barriers.insert(token, key);

        trace!(%token, "posted barrier");
        token
    }

    pub fn remove_barrier(&self, token: BarrierToken) -> Result<(), LooperError> {
        let mut state = self.0.state.lock();
        let key = state
            .barriers
            .remove(&token)
            .ok_or(LooperError::BarrierNotFound(token))?;

        let was_head = state
            .entries
            .first_key_value()
            .is_some_and(|(head, _)| *head == key);
        state.entries.remove(&key);

        // Stalled items behind a head barrier may be due already.
        if was_head && state.blocked {
            self.0.cond.notify_one();
        }

        trace!(%token, "removed barrier");
        Ok(())
    }

    pub fn cancel_by_tag(&self, tag: &Tag) -> usize {
        self.remove_where(|item| item.tag.as_ref() == Some(tag))
    }

    /// Removes every pending post of `callback`, compared by identity.
    pub fn cancel_by_callback(&self, callback: &SharedCallback) -> usize {
        self.remove_where(|item| item.is_callback(callback))
    }

    pub fn cancel_by_target(&self, target: HandlerId) -> usize {
        self.remove_where(|item| item.target_id() == Some(target))
    }

    /// Removes the items `target` posted with `tag`.
    pub fn cancel_by_target_and_tag(&self, target: HandlerId, tag: &Tag) -> usize {
        self.remove_where(|item| item.target_id() == Some(target) && item.tag.as_ref() == Some(tag))
    }

    /// Removes matching work items under the queue lock. Once this returns none
    /// of them can be handed out by `next()`.
    pub(crate) fn remove_where<F>(&self, pred: F) -> usize
    where
        F: Fn(&WorkItem) -> bool,
    {
        let removed = self.0.state.lock().remove_where(pred);
        removed.len()
    }

    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.any_where(|item| item.tag.as_ref() == Some(tag))
    }

    pub fn has_callback(&self, callback: &SharedCallback) -> bool {
        self.any_where(|item| item.is_callback(callback))
    }

    pub fn has_target(&self, target: HandlerId) -> bool {
        self.any_where(|item| item.target_id() == Some(target))
    }

    pub(crate) fn any_where<F>(&self, pred: F) -> bool
    where
        F: Fn(&WorkItem) -> bool,
    {
        self.0.state.lock().any_where(pred)
    }

    /// Transitions to quitting. Immediate quit discards everything pending.
    /// Safe quit only rejects new items: everything already queued still
    /// drains through `next()` at its due time, except items stalled behind a
    /// barrier. Quitting twice is a no-op.
    pub fn quit(&self, safely: bool) -> Result<(), LooperError> {
        if !self.0.quit_allowed {
            return Err(LooperError::QuitNotAllowed);
        }

        let discarded = {
            let mut state = self.0.state.lock();
            if state.quitting.is_some() {
                return Ok(());
            }

            let discarded = if safely {
                state.quitting = Some(QuitMode::Safe);
                Vec::new()
            } else {
                state.quitting = Some(QuitMode::Immediate);
                state.drain()
            };

            self.0.cond.notify_all();
            discarded
        };

        debug!(safely, discarded = discarded.len(), "queue quitting");
        Ok(())
    }

    pub fn add_idle_handler<H>(&self, handler: H) -> IdleHandlerId
    where
        H: IdleHandler + 'static,
    {
        let id = IdleHandlerId::next();
        self.0
            .state
            .lock()
            .idle_handlers
            .push((id, Arc::new(handler)));
        id
    }

    pub fn remove_idle_handler(&self, id: IdleHandlerId) -> bool {
        let mut state = self.0.state.lock();
        let before = state.idle_handlers.len();
        state.idle_handlers.retain(|(other, _)| *other != id);
        state.idle_handlers.len() != before
    }

    /// Number of pending entries, barriers included.
    pub fn len(&self) -> usize {
        self.0.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.state.lock().entries.is_empty()
    }

    /// True when nothing is eligible to run right now.
    pub fn is_idle(&self) -> bool {
        let state = self.0.state.lock();
        state
            .candidate()
            .is_none_or(|key| key.due > Instant::now())
    }

    pub fn is_quitting(&self) -> bool {
        self.0.state.lock().quitting.is_some()
    }

    pub fn quit_allowed(&self) -> bool {
        self.0.quit_allowed
    }

    /// True while the draining thread is parked inside [`TaskQueue::next`].
    pub fn is_blocked(&self) -> bool {
        self.0.state.lock().blocked
    }

    /// Writes one line per pending entry followed by a summary line.
    pub fn dump(&self, pw: &dyn Printer, prefix: &str) {
        let pw = PrefixPrinter::new(pw, prefix);
        let state = self.0.state.lock();
        let now = Instant::now();

        for (n, (key, entry)) in state.entries.iter().enumerate() {
            match entry {
                Entry::Work(item) => pw.println(&format!("Item {n}: {}", item.describe(now))),
                Entry::Barrier(token) => {
                    pw.println(&format!(
                        "Item {n}: {{ when={} seq={} barrier={token} }}",
                        relative_ms(key.due, now),
                        key.seq
                    ));
                    pw.println(&format!("WARNING! Item {n} is a barrier"));
                }
            }
        }

        pw.println(&format!(
            "(Total items: {}, barriers: {}, blocked: {}, quitting: {:?})",
            state.entries.len(),
            state.barriers.len(),
            state.blocked,
            state.quitting
        ));
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.0.state.lock();
        f.debug_struct("TaskQueue")
            .field("len", &state.entries.len())
            .field("barriers", &state.barriers.len())
            .field("quitting", &state.quitting)
            .field("quit_allowed", &self.0.quit_allowed)
            .finish()
    }
}
