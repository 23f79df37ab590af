//! Diagnostics: the bounded dispatch history and line printers.

pub(crate) mod local_log;
pub use local_log::LocalLog;

pub(crate) mod printer;
pub use printer::{PrefixPrinter, Printer, StringPrinter, TracingPrinter, WriterPrinter};
