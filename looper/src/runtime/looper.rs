use crate::errors::LooperError;
use crate::queue::TaskQueue;
use crate::runtime::identity::{self, CallingIdentity};
use crate::runtime::{LooperConfig, registry};
use crate::task::{BarrierToken, LooperId, WorkItem};
use crate::trace::{LocalLog, PrefixPrinter, Printer};
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::fmt;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::Instant;
use tracing::{debug, error, trace, warn};

#[derive(Debug)]
struct Dispatching {
    description: String,
    started: Instant,
}

struct Inner {
    id: LooperId,

    queue: TaskQueue,

    /// The only thread allowed to call `run()`.
    thread: Thread,

    cfg: LooperConfig,

    running: AtomicBool,

    /// Read once per dispatch, may be swapped from any thread.
    printer: Mutex<Option<Arc<dyn Printer>>>,

    history: Option<LocalLog>,

    /// Item being dispatched, tracked only when history is enabled.
    dispatching: Mutex<Option<Dispatching>>,
}

/// Per-thread cooperative scheduler draining one [`TaskQueue`].
///
/// A `Looper` is a cheap handle: clones refer to the same loop and can be sent
/// to other threads to post work, quit or dump it. Only the thread it was
/// prepared on may [`run`](Looper::run) it.
#[derive(Clone)]
pub struct Looper(Arc<Inner>);

impl Looper {
    pub(crate) fn new(cfg: LooperConfig, thread: Thread) -> Self {
        let history = (cfg.history_capacity > 0).then(|| LocalLog::new(cfg.history_capacity));

        Self(Arc::new(Inner {
            id: LooperId::next(),
            queue: TaskQueue::new(cfg.quit_allowed),
            thread,
            cfg,
            running: AtomicBool::new(false),
            printer: Mutex::new(None),
            history,
            dispatching: Mutex::new(None),
        }))
    }

    pub fn id(&self) -> LooperId {
        self.0.id
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.0.queue
    }

    pub fn thread(&self) -> &Thread {
        &self.0.thread
    }

    pub fn is_current_thread(&self) -> bool {
        thread::current().id() == self.0.thread.id()
    }

    pub fn is_main(&self) -> bool {
        registry::main_looper().is_some_and(|main| main.ptr_eq(self))
    }

    pub fn is_running(&self) -> bool {
        self.0.running.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &Looper) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Runs the loop on the calling thread until the queue quits.
    ///
    /// Payload panics are not caught: they unwind out of `run()` and the loop
    /// may be run again afterwards.
    pub fn run(&self) -> Result<(), LooperError> {
        let current = thread::current().id();
        if current != self.0.thread.id() {
            return Err(LooperError::WrongThread {
                expected: self.0.thread.id(),
                actual: current,
            });
        }

        if self.0.running.swap(true, Ordering::AcqRel) {
            return Err(LooperError::AlreadyRunning);
        }

        let _running = ScopeGuard::new(|| {
            self.0.dispatching.lock().take();
            self.0.running.store(false, Ordering::Release);
        });

        // Make sure this thread runs with the local identity and remember what
        // that token is.
        identity::clear_calling_identity();
        let ident = identity::clear_calling_identity();

        debug!(looper = %self.0.id, "entering loop");

        while let Some(item) = self.0.queue.next() {
            self.dispatch(item, ident);
        }

        debug!(looper = %self.0.id, "loop exited");
        Ok(())
    }

    fn dispatch(&self, item: WorkItem, ident: CallingIdentity) {
        let printer = self.0.printer.lock().clone();
        let target = item.target_label();
        let callback = item.callback_label();

        if let Some(printer) = &printer {
            printer.println(&format!(
                ">>>>> Dispatching to {target} {callback}: {}",
                item.tag_label()
            ));
        }

        let started = Instant::now();
        let due = item.due();
        let description = self.0.history.as_ref().map(|_| item.describe(started));
        if let Some(description) = &description {
            *self.0.dispatching.lock() = Some(Dispatching {
                description: description.clone(),
                started,
            });
        }

        trace!(looper = %self.0.id, target = %target, seq = %item.seq(), "dispatching");
        item.run();
        let elapsed = started.elapsed();

        if let Some(printer) = &printer {
            printer.println(&format!("<<<<< Finished to {target} {callback}"));
        }

        let slow = elapsed >= self.0.cfg.latency_threshold;
        let wait = started.saturating_duration_since(due);

        if let (Some(history), Some(description)) = (&self.0.history, description) {
            let mut line = String::new();
            if slow {
                line.push_str("WARNING! ");
            }
            let _ = write!(
                line,
                "Wait: {}ms, Run: {}ms due {description}",
                wait.as_millis(),
                elapsed.as_millis()
            );
            history.log(line);
            self.0.dispatching.lock().take();
        }

        if slow {
            warn!(
                looper = %self.0.id,
                target = %target,
                run_ms = elapsed.as_millis() as u64,
                wait_ms = wait.as_millis() as u64,
                "slow dispatch"
            );
        }

        // The payload must hand the thread back with the identity it found.
        let new_ident = identity::clear_calling_identity();
        if new_ident != ident {
            error!(
                looper = %self.0.id,
                "Thread identity changed from {ident} to {new_ident} while dispatching to {target} {callback}"
            );
        }
    }

    /// Quits immediately, discarding every pending item.
    pub fn quit(&self) -> Result<(), LooperError> {
        self.0.queue.quit(false)
    }

    /// Stops accepting items and quits once everything already queued has run.
    pub fn quit_safely(&self) -> Result<(), LooperError> {
        self.0.queue.quit(true)
    }

    /// Posts a barrier at the current time. Items already due keep running,
    /// everything after it that is not urgent waits for
    /// [`Looper::remove_barrier`].
    pub fn post_barrier(&self) -> BarrierToken {
        self.0.queue.post_barrier(Instant::now())
    }

    pub fn remove_barrier(&self, token: BarrierToken) -> Result<(), LooperError> {
        self.0.queue.remove_barrier(token)
    }

    /// Prints a line before and after every dispatch. `None` turns it off.
    pub fn set_message_logging(&self, printer: Option<Arc<dyn Printer>>) {
        *self.0.printer.lock() = printer;
    }

    pub fn history(&self) -> Option<&LocalLog> {
        self.0.history.as_ref()
    }

    pub fn dump(&self, pw: &dyn Printer, prefix: &str) {
        let pw = PrefixPrinter::new(pw, prefix);
        pw.println(&self.to_string());
        pw.println(&format!("running={}", self.is_running()));
        pw.println(&format!(
            "thread={:?} ({})",
            self.0.thread.id(),
            self.0.thread.name().unwrap_or("<unnamed>")
        ));

        if self.0.history.is_some() {
            match self.0.dispatching.lock().as_ref() {
                Some(d) => pw.println(&format!(
                    "dispatching={}, {}ms ago",
                    d.description,
                    d.started.elapsed().as_millis()
                )),
                None => pw.println("dispatching=none"),
            }
        }

        self.0.queue.dump(&pw, "  ");
    }

    /// Dumps the dispatch history, if enabled.
    pub fn dump_history(&self, pw: &dyn Printer) {
        if let Some(history) = &self.0.history {
            history.dump(pw);
        }
    }
}

impl fmt::Display for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Looper{{{}}}", self.0.id)
    }
}

impl fmt::Debug for Looper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Looper")
            .field("id", &self.0.id)
            .field("thread", &self.0.thread.id())
            .field("running", &self.is_running())
            .field("queue", &self.0.queue)
            .finish()
    }
}
