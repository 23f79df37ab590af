use std::marker::PhantomData;

/// Runs a closure when dropped, including while unwinding from a panic.
///
/// The loop relies on this to release its "running" flag when a dispatched
/// payload panics, so the panic reaches the thread boundary and the looper can
/// still be run again afterwards.
pub(crate) struct ScopeGuard<'a, F: FnOnce()> {
    // `Option` so the closure can be taken out exactly once.
    on_exit: Option<F>,

    _p: PhantomData<&'a ()>,
}

impl<'a, F: FnOnce()> ScopeGuard<'a, F> {
    pub(crate) fn new(on_exit: F) -> Self {
        ScopeGuard {
            on_exit: Some(on_exit),
            _p: PhantomData,
        }
    }
}

impl<'a, F: FnOnce()> Drop for ScopeGuard<'a, F> {
    fn drop(&mut self) {
        if let Some(on_exit) = self.on_exit.take() {
            on_exit();
        }
    }
}
