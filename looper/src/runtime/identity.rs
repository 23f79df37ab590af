//! Thread-ambient calling identity.
//!
//! Code servicing a request on behalf of another process switches the calling
//! identity of its thread and must restore it before returning. The loop
//! checks after every dispatch that the payload did so.

use std::cell::Cell;
use std::fmt;

#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct CallingIdentity(u64);

impl CallingIdentity {
    /// Identity of the local process.
    pub fn local() -> Self {
        Self(u64::from(std::process::id()))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for CallingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CallingIdentity({:#x})", self.0)
    }
}

impl fmt::Display for CallingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

thread_local! {
    static CALLING_IDENTITY: Cell<Option<CallingIdentity>> = const { Cell::new(None) };
}

/// Current identity of this thread. Defaults to [`CallingIdentity::local`].
pub fn calling_identity() -> CallingIdentity {
    CALLING_IDENTITY.with(|c| c.get().unwrap_or_else(CallingIdentity::local))
}

/// Resets this thread to the local identity and returns the previous one, to
/// be handed back to [`restore_calling_identity`].
pub fn clear_calling_identity() -> CallingIdentity {
    CALLING_IDENTITY.with(|c| c.replace(None).unwrap_or_else(CallingIdentity::local))
}

pub fn restore_calling_identity(identity: CallingIdentity) {
    CALLING_IDENTITY.with(|c| c.set(Some(identity)));
}
