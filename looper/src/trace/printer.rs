use parking_lot::Mutex;
use std::io::{self, Write};

/// Line-oriented sink used for message logging and dumps.
pub trait Printer: Send + Sync {
    fn println(&self, line: &str);
}

impl<F> Printer for F
where
    F: Fn(&str) + Send + Sync,
{
    fn println(&self, line: &str) {
        self(line)
    }
}

/// Forwards every line to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPrinter;

impl Printer for TracingPrinter {
    fn println(&self, line: &str) {
        tracing::debug!(target: "looper::messages", "{line}");
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct StringPrinter {
    lines: Mutex<Vec<String>>,
}

impl StringPrinter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.lock())
    }
}

impl Printer for StringPrinter {
    fn println(&self, line: &str) {
        self.lines.lock().push(line.to_string());
    }
}

/// Writes lines to any `io::Write`, e.g. stdout or a file. Write errors are
/// ignored, dumps are best effort.
#[derive(Debug)]
pub struct WriterPrinter<W> {
    writer: Mutex<W>,
}

impl<W: io::Write + Send> WriterPrinter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl<W: io::Write + Send> Printer for WriterPrinter<W> {
    fn println(&self, line: &str) {
        let _ = writeln!(self.writer.lock(), "{line}");
    }
}

/// Prepends a fixed prefix to every line.
pub struct PrefixPrinter<'a> {
    inner: &'a dyn Printer,
    prefix: &'a str,
}

impl<'a> PrefixPrinter<'a> {
    pub fn new(inner: &'a dyn Printer, prefix: &'a str) -> Self {
        Self { inner, prefix }
    }
}

impl Printer for PrefixPrinter<'_> {
    fn println(&self, line: &str) {
        if self.prefix.is_empty() {
            self.inner.println(line);
        } else {
            self.inner.println(&format!("{}{line}", self.prefix));
        }
    }
}
