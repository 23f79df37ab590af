use crate::task::BarrierToken;
use std::io;
use std::thread::ThreadId;

/// A centralized error type for looper, queue and registry operations.
///
/// Every variant except `Io` and `Other` is a usage violation: it points at a
/// bug in the caller rather than at a runtime condition worth retrying.
#[derive(thiserror::Error, Debug)]
pub enum LooperError {
    #[error("Only one Looper may be created per thread")]
    AlreadyPrepared,

    #[error("The main Looper has already been prepared")]
    MainAlreadyPrepared,

    #[error("Main thread not allowed to quit")]
    QuitNotAllowed,

    /// Removing a barrier that was never posted or was already removed.
    #[error("The specified barrier token {0} has not been posted or has already been removed")]
    BarrierNotFound(BarrierToken),

    #[error("Looper is already running, run() may not be called re-entrantly")]
    AlreadyRunning,

    #[error("Looper is bound to thread {expected:?} but run() was called from {actual:?}")]
    WrongThread { expected: ThreadId, actual: ThreadId },

    /// Spawning a looper thread failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A catch-all for any other type of unexpected error.
    #[error("An unexpected error occurred: {0}")]
    Other(#[from] anyhow::Error),
}

impl LooperError {
    /// True for errors caused by calling the API incorrectly.
    pub fn is_usage_violation(&self) -> bool {
        !matches!(self, LooperError::Io(_) | LooperError::Other(_))
    }
}

impl PartialEq for LooperError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::AlreadyPrepared, Self::AlreadyPrepared) => true,
            (Self::MainAlreadyPrepared, Self::MainAlreadyPrepared) => true,
            (Self::QuitNotAllowed, Self::QuitNotAllowed) => true,
            (Self::BarrierNotFound(a), Self::BarrierNotFound(b)) => a == b,
            (Self::AlreadyRunning, Self::AlreadyRunning) => true,
            (
                Self::WrongThread {
                    expected: e1,
                    actual: a1,
                },
                Self::WrongThread {
                    expected: e2,
                    actual: a2,
                },
            ) => e1 == e2 && a1 == a2,
            (Self::Io(a), Self::Io(b)) => a.kind() == b.kind(),
            _ => false,
        }
    }
}
