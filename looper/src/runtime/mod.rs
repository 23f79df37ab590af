mod builder;
pub use builder::{Builder, LooperThread};
pub(crate) use builder::LooperConfig;

mod handler;
pub use handler::Handler;

pub mod identity;

#[allow(clippy::module_inception)]
mod looper;
pub use looper::Looper;

mod registry;
pub use registry::{current, for_thread, main_looper, my_looper, my_queue, prepare, prepare_main};

#[cfg(test)]
mod tests;
