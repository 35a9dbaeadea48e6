//! Observable state with value-compared change notification.
//!
//! Observers register a selector and a callback. After every update the
//! selector runs again and the callback fires only when the selected value
//! differs from the last one it saw. Every registration hands back a
//! [`Disposer`]; disposers merge, so a component that registers many
//! observers still tears down through one call.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

type ObserverFn<S> = Box<dyn FnMut(&S)>;

struct Inner<S> {
    state: S,
    observers: Vec<(u64, ObserverFn<S>)>,
    /// Disposed while their observer list was out for notification.
    disposed_in_flight: Vec<u64>,
    next_id: u64,
}

/// A single-threaded state container with selector-based subscriptions.
pub struct Observable<S> {
    inner: Rc<RefCell<Inner<S>>>,
}

impl<S> Clone for Observable<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Observable<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("Observable")
            .field("state", &inner.state)
            .field("observers", &inner.observers.len())
            .finish()
    }
}

impl<S: Clone + 'static> Observable<S> {
    /// Create an observable holding `state`.
    #[must_use]
    pub fn new(state: S) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state,
                observers: Vec::new(),
                disposed_in_flight: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// A copy of the current state.
    #[must_use]
    pub fn get(&self) -> S {
        self.inner.borrow().state.clone()
    }

    /// Read the current state without cloning it.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.borrow().state)
    }

    /// Observe the value picked by `selector`.
    ///
    /// The selector is evaluated once at registration to seed the comparison;
    /// `callback` only runs on later changes.
    pub fn observe<T, Sel, Cb>(&self, selector: Sel, mut callback: Cb) -> Disposer
    where
        T: PartialEq + 'static,
        Sel: Fn(&S) -> T + 'static,
        Cb: FnMut(&T) + 'static,
    {
        let mut last = self.with(&selector);
        let observer: ObserverFn<S> = Box::new(move |state: &S| {
            let current = selector(state);
            if current != last {
                callback(&current);
                last = current;
            }
        });

        let id = {
            let mut inner = self.inner.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.observers.push((id, observer));
            id
        };

        let weak: Weak<RefCell<Inner<S>>> = Rc::downgrade(&self.inner);
        Disposer::from_fn(move || {
            if let Some(inner) = weak.upgrade() {
                let mut inner = inner.borrow_mut();
                let before = inner.observers.len();
                inner.observers.retain(|(oid, _)| *oid != id);
                if inner.observers.len() == before {
                    inner.disposed_in_flight.push(id);
                }
            }
        })
    }

    /// Mutate the state, then notify observers whose selection changed.
    ///
    /// Observers see a snapshot, so they may read the observable again.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        let (snapshot, mut observers) = {
            let mut inner = self.inner.borrow_mut();
            f(&mut inner.state);
            (inner.state.clone(), std::mem::take(&mut inner.observers))
        };

        for (_, observer) in &mut observers {
            observer(&snapshot);
        }

        let mut inner = self.inner.borrow_mut();
        // keep observers registered from inside a callback
        observers.append(&mut inner.observers);
        let disposed = std::mem::take(&mut inner.disposed_in_flight);
        observers.retain(|(id, _)| !disposed.contains(id));
        inner.observers = observers;
    }

    /// Replace the state wholesale.
    pub fn set(&self, state: S) {
        self.update(|s| *s = state);
    }

    /// Number of registered observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.borrow().observers.len()
    }
}

/// A bundle of unsubscribe actions that runs each one exactly once.
///
/// Dropping a disposer that was never disposed disposes it.
#[derive(Default)]
#[must_use = "dropping a Disposer unsubscribes immediately"]
pub struct Disposer {
    actions: Vec<Box<dyn FnOnce()>>,
}

impl fmt::Debug for Disposer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposer")
            .field("actions", &self.actions.len())
            .finish()
    }
}

impl Disposer {
    /// An empty disposer.
    pub fn new() -> Self {
        Self::default()
    }

    /// A disposer running a single action.
    pub fn from_fn(action: impl FnOnce() + 'static) -> Self {
        Self {
            actions: vec![Box::new(action)],
        }
    }

    /// Add another action.
    pub fn push(&mut self, action: impl FnOnce() + 'static) {
        self.actions.push(Box::new(action));
    }

    /// Absorb the actions of another disposer.
    pub fn merge(&mut self, mut other: Self) {
        self.actions.append(&mut other.actions);
    }

    /// Whether there is nothing left to dispose.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Run every action.
    pub fn dispose(mut self) {
        self.run();
    }

    fn run(&mut self) {
        for action in self.actions.drain(..) {
            action();
        }
    }
}

impl Drop for Disposer {
    fn drop(&mut self) {
        self.run();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default)]
    struct AppState {
        counter: u32,
        label: String,
    }

    #[test]
    fn test_observer_fires_only_on_selected_change() {
        let store = Observable::new(AppState::default());
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = Rc::clone(&seen);
        let _sub = store.observe(|s| s.counter, move |c| sink.borrow_mut().push(*c));

        store.update(|s| s.label = "unrelated".to_string());
        store.update(|s| s.counter = 1);
        store.update(|s| s.counter = 1);
        store.update(|s| s.counter = 2);

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_dispose_unsubscribes() {
        let store = Observable::new(AppState::default());
        let calls = Rc::new(RefCell::new(0));

        let sink = Rc::clone(&calls);
        let sub = store.observe(|s| s.counter, move |_| *sink.borrow_mut() += 1);
        assert_eq!(store.observer_count(), 1);

        sub.dispose();
        store.update(|s| s.counter = 5);
        assert_eq!(*calls.borrow(), 0);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_merged_disposer_releases_everything() {
        let store = Observable::new(AppState::default());
        let mut all = Disposer::new();
        all.merge(store.observe(|s| s.counter, |_| {}));
        all.merge(store.observe(|s| s.label.clone(), |_| {}));
        assert_eq!(store.observer_count(), 2);

        drop(all);
        assert_eq!(store.observer_count(), 0);
    }

    #[test]
    fn test_callback_may_read_the_store() {
        let store = Observable::new(AppState::default());
        let reader = store.clone();
        let seen = Rc::new(RefCell::new(String::new()));
        let sink = Rc::clone(&seen);
        let _sub = store.observe(
            |s| s.counter,
            move |_| *sink.borrow_mut() = reader.get().label,
        );

        store.update(|s| {
            s.counter = 1;
            s.label = "read back".to_string();
        });
        assert_eq!(*seen.borrow(), "read back");
    }
}
