use crate::errors::LooperError;
use crate::queue::TaskQueue;
use crate::runtime::{Builder, Looper, LooperConfig};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{LazyLock, OnceLock};
use std::thread::{self, ThreadId};
use tracing::debug;

/// Every prepared looper, keyed by the thread it is bound to. Entries are never
/// removed: a looper stays reachable for its thread after it quits.
static LOOPERS: LazyLock<DashMap<ThreadId, Looper>> = LazyLock::new(DashMap::new);

static MAIN: OnceLock<Looper> = OnceLock::new();

/// Claimed by the first `prepare_main` caller before it registers anything.
static MAIN_CLAIMED: AtomicBool = AtomicBool::new(false);

pub(crate) fn register(cfg: LooperConfig) -> Result<Looper, LooperError> {
    let thread = thread::current();

    match LOOPERS.entry(thread.id()) {
        Entry::Occupied(_) => Err(LooperError::AlreadyPrepared),
        Entry::Vacant(slot) => {
            let looper = Looper::new(cfg, thread);
            slot.insert(looper.clone());

            debug!(
                looper = %looper.id(),
                thread = ?looper.thread().id(),
                quit_allowed = looper.queue().quit_allowed(),
                "prepared looper"
            );
            Ok(looper)
        }
    }
}

/// Prepares a [`Looper`] with default settings for the calling thread.
pub fn prepare() -> Result<Looper, LooperError> {
    Builder::new().prepare()
}

/// Prepares the process' main looper on the calling thread. It can never quit.
///
/// Only one caller wins. Losers get [`LooperError::MainAlreadyPrepared`] and
/// their thread is left without a looper.
pub fn prepare_main() -> Result<Looper, LooperError> {
    if MAIN_CLAIMED
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return Err(LooperError::MainAlreadyPrepared);
    }

    let looper = match Builder::new().quit_allowed(false).prepare() {
        Ok(looper) => looper,
        Err(e) => {
            // Nothing was registered, let another thread become main.
            MAIN_CLAIMED.store(false, Ordering::Release);
            return Err(e);
        }
    };
    MAIN.set(looper.clone())
        .map_err(|_| LooperError::MainAlreadyPrepared)?;

    debug!(looper = %looper.id(), "prepared main looper");
    Ok(looper)
}

pub fn main_looper() -> Option<Looper> {
    MAIN.get().cloned()
}

/// The looper bound to the calling thread, if any.
pub fn current() -> Option<Looper> {
    for_thread(thread::current().id())
}

pub fn for_thread(id: ThreadId) -> Option<Looper> {
    LOOPERS.get(&id).map(|entry| entry.value().clone())
}

/// The looper bound to the calling thread.
///
/// # Panics
///
/// If [`prepare`] was never called on this thread.
#[track_caller]
pub fn my_looper() -> Looper {
    current().expect("No Looper; prepare() wasn't called on this thread.")
}

/// Queue of the looper bound to the calling thread.
///
/// # Panics
///
/// If [`prepare`] was never called on this thread.
#[track_caller]
pub fn my_queue() -> TaskQueue {
    my_looper().queue().clone()
}
