//! Observable state container
//!
//! Session status, executor progress and controller snapshots are all published
//! through [`Observable`]. Any number of observers can [`subscribe`](Observable::subscribe)
//! and are woken on every change; writers mutate in place under the channel's
//! lock, so check-and-set transitions are atomic.

use tokio::sync::watch;

/// A value that can be read, mutated, and observed from any task
#[derive(Debug)]
pub struct Observable<T> {
    sender: watch::Sender<T>,
}

impl<T> Observable<T> {
    /// Wrap an initial value
    pub fn new(initial: T) -> Self {
        let (sender, _) = watch::channel(initial);
        Self { sender }
    }

    /// Run `f` against the current value without cloning it
    pub fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.sender.borrow())
    }

    /// Mutate the value and notify observers unconditionally
    pub fn update(&self, f: impl FnOnce(&mut T)) {
        self.sender.send_modify(f);
    }

    /// Mutate the value if `f` returns true, notifying observers only then.
    ///
    /// The closure runs under the write lock, which makes this the primitive for
    /// "if state is X, move to Y" transitions.
    pub fn transition(&self, f: impl FnOnce(&mut T) -> bool) -> bool {
        self.sender.send_if_modified(f)
    }

    /// Replace the value
    pub fn set(&self, value: T) {
        self.sender.send_replace(value);
    }

    /// New observer positioned at the current value
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.sender.subscribe()
    }

    /// Number of live observers
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone> Observable<T> {
    /// Snapshot of the current value
    pub fn get(&self) -> T {
        self.sender.borrow().clone()
    }
}

impl<T: Default> Default for Observable<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
