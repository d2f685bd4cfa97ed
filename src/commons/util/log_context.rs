//! A per-thread context added to log lines.
//!
//! The command engine sets the context to the command it is executing so
//! that everything logged while the command runs can be attributed to it.

use std::cell::RefCell;


thread_local! {
    static CURRENT: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Returns the context of the current thread.
pub fn current() -> Option<String> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Sets the context until the returned guard is dropped.
///
/// The previous context, if any, is restored by the guard.
pub fn enter(context: impl Into<String>) -> ContextGuard {
    let previous = CURRENT.with(|current| {
        current.borrow_mut().replace(context.into())
    });
    ContextGuard { previous }
}


//------------ ContextGuard --------------------------------------------------

#[must_use]
pub struct ContextGuard {
    previous: Option<String>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}


//------------ Tests ---------------------------------------------------------
