//! Synchronous propagation of events to listeners within one command.
//!
//! A [`PropagationScope`] is created for every top-level command and is
//! passed explicitly to everything that runs as part of it. Every command
//! invocation, including nested ones, enters its own delegate on the scope
//! and subscribes its listeners there. Events are delivered to the
//! listeners of the innermost delegate only.
//!
//! The scope is neither `Send` nor `Sync`, so subscriptions made for one
//! command can never be seen by a command running on another thread.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;
use log::warn;


//------------ EventDelegate -------------------------------------------------

/// The listeners subscribed for one command invocation.
struct EventDelegate<L: ?Sized> {
    listeners: RefCell<Vec<(u64, Arc<L>)>>,
}

impl<L: ?Sized> EventDelegate<L> {
    fn new() -> Self {
        EventDelegate { listeners: RefCell::new(Vec::new()) }
    }

    fn remove(&self, id: u64) {
        self.listeners.borrow_mut().retain(|(listener_id, _)| {
            *listener_id != id
        });
    }

    fn clear(&self) -> usize {
        let mut listeners = self.listeners.borrow_mut();
        let len = listeners.len();
        listeners.clear();
        len
    }
}


//------------ PropagationScope ----------------------------------------------

pub struct PropagationScope<L: ?Sized> {
    /// The delegates of the invocations currently running, innermost last.
    stack: RefCell<Vec<Rc<EventDelegate<L>>>>,

    /// All delegates ever entered in this scope.
    created: RefCell<Vec<Rc<EventDelegate<L>>>>,

    next_subscription: Cell<u64>,
}

impl<L: ?Sized> Default for PropagationScope<L> {
    fn default() -> Self {
        PropagationScope {
            stack: RefCell::new(Vec::new()),
            created: RefCell::new(Vec::new()),
            next_subscription: Cell::new(0),
        }
    }
}

impl<L: ?Sized> PropagationScope<L> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a new delegate for a command invocation.
    ///
    /// The delegate stays the innermost one until the returned guard is
    /// dropped.
    pub fn enter(&self) -> DelegateGuard<'_, L> {
        let delegate = Rc::new(EventDelegate::new());
        self.stack.borrow_mut().push(delegate.clone());
        self.created.borrow_mut().push(delegate.clone());
        DelegateGuard { scope: self, delegate }
    }

    /// Returns the number of delegates currently entered.
    pub fn depth(&self) -> usize {
        self.stack.borrow().len()
    }

    /// Subscribes a listener to the innermost delegate.
    ///
    /// The listener stays subscribed until the returned subscription is
    /// dropped or cancelled. Subscribing outside of any delegate enters
    /// one that lasts until the scope is reset.
    pub fn subscribe(&self, listener: Arc<L>) -> Subscription<L> {
        let delegate = match self.stack.borrow().last() {
            Some(delegate) => delegate.clone(),
            None => {
                let delegate = Rc::new(EventDelegate::new());
                self.created.borrow_mut().push(delegate.clone());
                delegate
            }
        };
        if self.stack.borrow().is_empty() {
            self.stack.borrow_mut().push(delegate.clone());
        }

        let id = self.next_subscription.get();
        self.next_subscription.set(id + 1);
        delegate.listeners.borrow_mut().push((id, listener));
        Subscription { delegate: Rc::downgrade(&delegate), id }
    }

    /// Returns the listeners an event should be delivered to.
    ///
    /// These are the listeners of the innermost delegate, the one
    /// subscribed most recently first. The list is a snapshot, so listeners
    /// may subscribe or cancel while an event is being delivered.
    pub fn listeners(&self) -> Vec<Arc<L>> {
        match self.stack.borrow().last() {
            Some(delegate) => {
                delegate.listeners.borrow().iter().rev().map(|(_, listener)| {
                    listener.clone()
                }).collect()
            }
            None => Vec::new(),
        }
    }

    /// Drops every subscription made in this scope.
    ///
    /// Subscriptions should normally have been cancelled already, so a
    /// warning is logged for each delegate that still had listeners.
    pub fn reset(&self) {
        for delegate in self.created.borrow_mut().drain(..) {
            let dropped = delegate.clear();
            if dropped > 0 {
                warn!(
                    "Dropped {} event listener(s) that were never cancelled",
                    dropped
                );
            }
        }
        self.stack.borrow_mut().clear();
    }
}


//------------ DelegateGuard -------------------------------------------------

/// Leaves the delegate when dropped.
pub struct DelegateGuard<'a, L: ?Sized> {
    scope: &'a PropagationScope<L>,
    delegate: Rc<EventDelegate<L>>,
}

impl<L: ?Sized> Drop for DelegateGuard<'_, L> {
    fn drop(&mut self) {
        let mut stack = self.scope.stack.borrow_mut();
        if let Some(pos) = stack.iter().rposition(|delegate| {
            Rc::ptr_eq(delegate, &self.delegate)
        }) {
            stack.truncate(pos);
        }
    }
}


//------------ Subscription --------------------------------------------------

/// A listener subscription, cancelled when dropped.
pub struct Subscription<L: ?Sized> {
    delegate: Weak<EventDelegate<L>>,
    id: u64,
}

impl<L: ?Sized> Subscription<L> {
    pub fn cancel(self) {}
}

impl<L: ?Sized> Drop for Subscription<L> {
    fn drop(&mut self) {
        if let Some(delegate) = self.delegate.upgrade() {
            delegate.remove(self.id)
        }
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    trait Named {
        fn name(&self) -> &'static str;
    }

    struct Listener(&'static str);

    impl Named for Listener {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    fn names(scope: &PropagationScope<dyn Named>) -> Vec<&'static str> {
        scope.listeners().iter().map(|listener| listener.name()).collect()
    }

    #[test]
    fn most_recent_listener_first() {
        let scope: PropagationScope<dyn Named> = PropagationScope::new();
        let _delegate = scope.enter();
        let _a = scope.subscribe(Arc::new(Listener("a")));
        let b = scope.subscribe(Arc::new(Listener("b")));
        assert_eq!(names(&scope), vec!["b", "a"]);

        b.cancel();
        assert_eq!(names(&scope), vec!["a"]);
    }

    #[test]
    fn innermost_delegate_only() {
        let scope: PropagationScope<dyn Named> = PropagationScope::new();
        let _outer = scope.enter();
        let _a = scope.subscribe(Arc::new(Listener("outer")));
        {
            let _inner = scope.enter();
            let _b = scope.subscribe(Arc::new(Listener("inner")));
            assert_eq!(scope.depth(), 2);
            assert_eq!(names(&scope), vec!["inner"]);
        }
        assert_eq!(scope.depth(), 1);
        assert_eq!(names(&scope), vec!["outer"]);
    }

    #[test]
    fn reset_drops_leftovers() {
        let scope: PropagationScope<dyn Named> = PropagationScope::new();
        let delegate = scope.enter();
        let subscription = scope.subscribe(Arc::new(Listener("a")));
        std::mem::forget(subscription);
        drop(delegate);

        scope.reset();
        assert_eq!(scope.depth(), 0);
        assert!(names(&scope).is_empty());
    }

    #[test]
    fn subscribe_without_delegate() {
        let scope: PropagationScope<dyn Named> = PropagationScope::new();
        let _a = scope.subscribe(Arc::new(Listener("a")));
        assert_eq!(names(&scope), vec!["a"]);
        scope.reset();
        assert!(names(&scope).is_empty());
    }
}
