//! Single-threaded cooperative message loops.
//!
//! A thread prepares a [`Looper`], then [`run`](Looper::run)s it: the loop
//! drains a time-ordered [`TaskQueue`] and executes each [`WorkItem`] to
//! completion, one at a time, on that thread. Any other thread may post work
//! through a [`Handler`], cancel it, post barriers or ask the loop to quit.
//!
//! ```no_run
//! use looper::{Handler, LooperError};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), LooperError> {
//!     let main_loop = looper::prepare()?;
//!     let handler = Handler::new(&main_loop);
//!
//!     handler.post(|| println!("first"));
//!     handler.post_delayed(
//!         || looper::my_looper().quit().expect("quit allowed"),
//!         Duration::from_millis(10),
//!     );
//!
//!     main_loop.run()
//! }
//! ```

mod errors;
pub use errors::LooperError;

pub mod queue;
pub use queue::{IdleHandler, TaskQueue};

pub mod runtime;
pub use runtime::{
    Builder, Handler, Looper, LooperThread, current, for_thread, main_looper, my_looper, my_queue,
    prepare, prepare_main,
};

pub mod task;
pub use task::{BarrierToken, SharedCallback, Tag, WorkItem};

pub mod trace;

mod utils;

#[cfg(test)]
mod test_utils;
