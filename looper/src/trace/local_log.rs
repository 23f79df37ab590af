use crate::trace::Printer;
use chrono::{DateTime, Local};
use parking_lot::Mutex;

#[derive(Debug, Clone)]
struct LogEntry {
    at: DateTime<Local>,
    message: String,
}

/// Fixed capacity ring. Slots fill up in order, then `next` walks around and
/// overwrites the oldest entry.
#[derive(Debug)]
struct Ring {
    slots: Vec<LogEntry>,
    next: usize,
}

impl Ring {
    fn push(&mut self, capacity: usize, entry: LogEntry) {
        if self.slots.len() < capacity {
            self.slots.push(entry);
        } else {
            self.slots[self.next] = entry;
        }
        self.next = (self.next + 1) % capacity;
    }

    /// Oldest first. Until the ring wraps `next == slots.len()` and `older` is
    /// empty.
    fn ordered(&self) -> Vec<LogEntry> {
        let (newer, older) = self.slots.split_at(self.next);
        older.iter().chain(newer).cloned().collect()
    }
}

/// Bounded, timestamped history of free-text lines.
///
/// A capacity of `0` turns logging into a no-op.
#[derive(Debug)]
pub struct LocalLog {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl LocalLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: Mutex::new(Ring {
                slots: Vec::with_capacity(capacity),
                next: 0,
            }),
        }
    }

    pub fn log(&self, message: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }

        let entry = LogEntry {
            at: Local::now(),
            message: message.into(),
        };
        self.ring.lock().push(self.capacity, entry);
    }

    /// Writes every held entry, oldest first, as `HH:MM:SS.mmm - message`.
    pub fn dump(&self, pw: &dyn Printer) {
        // Copy under the lock, format outside of it.
        let entries = self.snapshot();

        for entry in entries {
            pw.println(&format!(
                "{} - {}",
                entry.at.format("%H:%M:%S%.3f"),
                entry.message
            ));
        }
    }

    /// Messages currently held, oldest first, without timestamps.
    pub fn messages(&self) -> Vec<String> {
        self.snapshot().into_iter().map(|e| e.message).collect()
    }

    fn snapshot(&self) -> Vec<LogEntry> {
        self.ring.lock().ordered()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
