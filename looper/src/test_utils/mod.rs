use parking_lot::Mutex;
use std::fmt;
use std::panic::resume_unwind;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Records labelled events from payloads, in the order they ran.
#[derive(Debug, Clone, Default)]
pub(crate) struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, event: impl Into<String>) {
        self.events.lock().push(event.into());
    }

    /// Payload recording `event` when run.
    pub(crate) fn push(&self, event: &'static str) -> impl FnOnce() + Send + 'static + use<> {
        let recorder = self.clone();
        move || recorder.record(event)
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

/// An instant `ms` milliseconds in the past.
pub(crate) fn ago(ms: u64) -> Instant {
    Instant::now() - Duration::from_millis(ms)
}

/// Loopers are bound to their thread for the lifetime of the process, so every
/// test preparing one does it on a fresh thread. Panics are resumed on the
/// caller.
pub(crate) fn on_new_thread<F, T>(f: F) -> T
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    match thread::spawn(f).join() {
        Ok(res) => res,
        Err(panic) => resume_unwind(panic),
    }
}

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Collects `(level, message)` of every event emitted while installed.
#[derive(Debug, Clone, Default)]
pub(crate) struct CaptureLayer {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CaptureLayer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn events_at(&self, level: Level) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(l, _)| *l == level)
            .map(|(_, msg)| msg.clone())
            .collect()
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events
            .lock()
            .push((*event.metadata().level(), visitor.0));
    }
}
