use crate::errors::LooperError;
use crate::runtime::{Handler, Looper, registry};
use anyhow::anyhow;
use std::fmt;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// Dispatches running at least this long are flagged in the history and
/// logged as slow.
const LATENCY_THRESHOLD: Duration = Duration::from_millis(500);

/// History is off unless asked for.
const HISTORY_CAPACITY: usize = 0;

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn() -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    let thread_count = Arc::new(AtomicUsize::new(0));

    ThreadNameFn(Arc::new(move || {
        let id = thread_count.fetch_add(1, Ordering::Relaxed);
        format!("looper-{}", id)
    }))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Settings carried by a prepared [`Looper`].
#[derive(Debug, Clone)]
pub(crate) struct LooperConfig {
    /// The main looper is created with `false` and refuses to quit.
    pub(crate) quit_allowed: bool,

    /// Number of dispatch records kept for `dump_history`, `0` disables it.
    pub(crate) history_capacity: usize,

    pub(crate) latency_threshold: Duration,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            quit_allowed: true,
            history_capacity: HISTORY_CAPACITY,
            latency_threshold: LATENCY_THRESHOLD,
        }
    }
}

/// Configures a [`Looper`] before preparing it on the current thread or on a
/// dedicated thread.
///
/// ```no_run
/// use looper::{Builder, Handler};
/// use std::time::Duration;
///
/// let thread = Builder::new()
///     .thread_name("net-events")
///     .history_capacity(64)
///     .latency_threshold(Duration::from_millis(100))
///     .spawn()?;
///
/// thread.handler().post(|| println!("hello from the loop"));
/// thread.quit_safely()?;
/// thread.join()?;
/// # Ok::<(), looper::LooperError>(())
/// ```
#[derive(Debug)]
pub struct Builder {
    cfg: LooperConfig,

    /// Name fn used for threads spawned with [`Builder::spawn`].
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned with [`Builder::spawn`].
    thread_stack_size: Option<usize>,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Builder {
        Self {
            cfg: LooperConfig::default(),
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
        }
    }

    /// Whether `quit()` is accepted. Defaults to `true`. Threads started with
    /// [`spawn`](Builder::spawn) must allow it.
    pub fn quit_allowed(mut self, val: bool) -> Self {
        self.cfg.quit_allowed = val;
        self
    }

    /// Keeps the last `val` dispatch records (wait time, run time, item) for
    /// [`Looper::dump_history`]. Defaults to `0`, meaning no history.
    pub fn history_capacity(mut self, val: usize) -> Self {
        self.cfg.history_capacity = val;
        self
    }

    /// Run time from which a dispatch is considered slow. Defaults to 500ms.
    #[track_caller]
    pub fn latency_threshold(mut self, val: Duration) -> Self {
        assert!(!val.is_zero(), "latency_threshold must be greater than 0");
        self.cfg.latency_threshold = val;
        self
    }

    /// Sets the name of the thread started by [`Builder::spawn`].
    ///
    /// The default name is "looper-{id}", where id is monotonically increasing.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move || val.clone()));
        self
    }

    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    #[track_caller]
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        assert!(val > 0, "thread_stack_size must be greater than 0");
        self.thread_stack_size = Some(val);
        self
    }

    /// Binds a new [`Looper`] to the calling thread.
    ///
    /// Fails with [`LooperError::AlreadyPrepared`] if the thread already has
    /// one.
    pub fn prepare(self) -> Result<Looper, LooperError> {
        registry::register(self.cfg)
    }

    /// Starts a thread, prepares a [`Looper`] on it and runs it until quit.
    ///
    /// Returns once the looper is registered, so items may be posted right
    /// away.
    ///
    /// Fails with [`LooperError::QuitNotAllowed`] if the builder was set to
    /// [`quit_allowed(false)`](Builder::quit_allowed): such a thread could
    /// never be joined.
    pub fn spawn(self) -> Result<LooperThread, LooperError> {
        if !self.cfg.quit_allowed {
            return Err(LooperError::QuitNotAllowed);
        }

        let name = (self.thread_name.0)();

        let mut builder = thread::Builder::new().name(name.clone());
        if let Some(size) = self.thread_stack_size {
            builder = builder.stack_size(size);
        }

        let cfg = self.cfg;
        let (tx, rx) = mpsc::sync_channel(1);

        let handle = builder.spawn(move || -> Result<(), LooperError> {
            let looper = registry::register(cfg)?;

            // Receiver is gone only if `spawn` itself unwound.
            let _ = tx.send(looper.clone());
            looper.run()
        })?;

        match rx.recv() {
            Ok(looper) => {
                debug!(thread = %name, looper = %looper.id(), "spawned looper thread");
                Ok(LooperThread { looper, handle })
            }
            Err(_) => match handle.join() {
                Ok(Err(e)) => Err(e),
                Ok(Ok(())) => Err(anyhow!("looper thread {name} exited before preparing").into()),
                Err(panic) => resume_unwind(panic),
            },
        }
    }
}

/// A thread dedicated to running one [`Looper`].
#[derive(Debug)]
pub struct LooperThread {
    looper: Looper,
    handle: JoinHandle<Result<(), LooperError>>,
}

impl LooperThread {
    pub fn looper(&self) -> &Looper {
        &self.looper
    }

    pub fn handler(&self) -> Handler {
        Handler::new(&self.looper)
    }

    pub fn quit(&self) -> Result<(), LooperError> {
        self.looper.quit()
    }

    pub fn quit_safely(&self) -> Result<(), LooperError> {
        self.looper.quit_safely()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the loop to return. A payload panic on the looper thread is
    /// resumed on the caller.
    pub fn join(self) -> Result<(), LooperError> {
        match self.handle.join() {
            Ok(res) => res,
            Err(panic) => resume_unwind(panic),
        }
    }
}
