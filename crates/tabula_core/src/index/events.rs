//! Change notification channel between a unique index and its observers.
//!
//! Events are delivered synchronously on the mutating thread, after the
//! owning index has pushed its undo record. A subscriber that returns an
//! error aborts the originating mutation; the outer transaction then rolls
//! the already-pushed undo back. This is the conduit foreign indexes use to
//! veto parent mutations that would orphan their rows.

use crate::error::CoreResult;
use parking_lot::Mutex;

/// What a unique-index mutation did to its map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    /// A key was inserted.
    Add,
    /// A row moved from one key to another.
    Update,
    /// A key was removed.
    Delete,
    /// A key change was undone. Never emitted by the built-in indexes; undo
    /// is local to each transaction participant.
    Rollback,
}

/// A change to a unique index, described by the keys it touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent<K> {
    /// The mutation kind.
    pub action: ChangeAction,
    /// Key the row was stored under before the mutation, if any.
    pub previous: Option<K>,
    /// Key the row is stored under after the mutation, if any.
    pub current: Option<K>,
}

type Subscriber<K> = Box<dyn Fn(&ChangeEvent<K>) -> CoreResult<()> + Send + Sync>;

/// Multicast registry of change subscribers.
pub struct ChangeChannel<K> {
    subscribers: Mutex<Vec<Subscriber<K>>>,
}

impl<K> ChangeChannel<K> {
    /// Creates a channel with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a subscriber.
    ///
    /// Subscribers are invoked in registration order and may abort the
    /// originating mutation by returning an error.
    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&ChangeEvent<K>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.subscribers.lock().push(Box::new(subscriber));
    }

    /// Delivers an event to every subscriber, stopping at the first error.
    pub fn emit(&self, event: &ChangeEvent<K>) -> CoreResult<()> {
        let subscribers = self.subscribers.lock();
        for subscriber in subscribers.iter() {
            subscriber(event)?;
        }
        Ok(())
    }

    /// Returns the number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<K> Default for ChangeChannel<K> {
    fn default() -> Self {
        Self::new()
    }
}
