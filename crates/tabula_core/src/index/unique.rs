//! Unique index: one row per key.

use crate::error::{CoreError, CoreResult};
use crate::index::events::{ChangeAction, ChangeChannel, ChangeEvent};
use crate::index::{FilterFn, IndexHandle, IndexKey, KeyFn};
use crate::lock::{Lockable, ReaderWriterLock};
use crate::row::{Row, RowVersion};
use crate::transaction::{PrepareVote, TransactionParticipant};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reverse-mutation record accumulated during a transaction.
enum UndoRecord<K, R> {
    /// Put a row back under a key.
    Restore { key: K, row: Arc<R> },
    /// Take a key out again.
    Drop { key: K },
}

struct UniqueState<K, R> {
    rows: HashMap<K, Arc<R>>,
    undo: Vec<UndoRecord<K, R>>,
}

/// Key→row mapping with transactional mutation, analogous to a primary key.
///
/// Configure with [`has_index`](Self::has_index) (the key extractor) and
/// optionally [`has_filter`](Self::has_filter) (rows failing the predicate
/// are invisible to the index). Every successful mutation pushes an undo
/// record and then emits a [`ChangeEvent`] to subscribers; a subscriber
/// error aborts the mutation, leaving the undo record for the enclosing
/// transaction to roll back.
///
/// # Example
///
/// ```rust,ignore
/// let by_id = UniqueIndex::new("person_pk")
///     .has_index(|row: &Person| row.id())
///     .build();
/// by_id.add(&person)?;
/// ```
pub struct UniqueIndex<K, R> {
    name: String,
    lock: ReaderWriterLock,
    key_fn: Option<KeyFn<K, R>>,
    filter: FilterFn<R>,
    state: Mutex<UniqueState<K, R>>,
    changed: ChangeChannel<K>,
}

impl<K: IndexKey, R: Row> UniqueIndex<K, R> {
    /// Creates an unconfigured index.
    ///
    /// The key function must be registered before first use; the default
    /// filter admits every row.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lock: ReaderWriterLock::new(),
            key_fn: None,
            filter: Arc::new(|_| true),
            state: Mutex::new(UniqueState {
                rows: HashMap::new(),
                undo: Vec::new(),
            }),
            changed: ChangeChannel::new(),
        }
    }

    /// Registers the key extractor.
    #[must_use]
    pub fn has_index<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&R) -> K + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Registers the admission predicate.
    #[must_use]
    pub fn has_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&R) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Finishes configuration.
    #[must_use]
    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the key a row is indexed by.
    pub fn key_of(&self, row: &R) -> CoreResult<K> {
        match &self.key_fn {
            Some(key_fn) => Ok(key_fn(row)),
            None => Err(CoreError::key_function_missing(&self.name)),
        }
    }

    /// Whether the filter admits a row into this index.
    pub fn admits(&self, row: &R) -> bool {
        (self.filter)(row)
    }

    /// Inserts a row under its key.
    ///
    /// Rows rejected by the filter are ignored. Fails with
    /// [`CoreError::DuplicateKey`] when the key is already mapped.
    pub fn add(&self, row: &Arc<R>) -> CoreResult<()> {
        if !self.admits(row) {
            return Ok(());
        }
        let key = self.key_of(row)?;
        {
            let mut state = self.state.lock();
            if state.rows.contains_key(&key) {
                return Err(CoreError::duplicate_key(&self.name, &key));
            }
            state.rows.insert(key.clone(), Arc::clone(row));
            state.undo.push(UndoRecord::Drop { key: key.clone() });
        }
        self.changed.emit(&ChangeEvent {
            action: ChangeAction::Add,
            previous: None,
            current: Some(key),
        })
    }

    /// Removes a row by its key.
    ///
    /// Rows rejected by the filter or absent from the map are ignored.
    pub fn remove(&self, row: &Arc<R>) -> CoreResult<()> {
        if !self.admits(row) {
            return Ok(());
        }
        let key = self.key_of(row)?;
        let removed = {
            let mut state = self.state.lock();
            match state.rows.remove(&key) {
                Some(stored) => {
                    state.undo.push(UndoRecord::Restore {
                        key: key.clone(),
                        row: stored,
                    });
                    true
                }
                None => false,
            }
        };
        if !removed {
            return Ok(());
        }
        self.changed.emit(&ChangeEvent {
            action: ChangeAction::Delete,
            previous: Some(key),
            current: None,
        })
    }

    /// Re-keys a row whose pending change moved it to a different key.
    ///
    /// The row's [`RowVersion::Previous`] snapshot supplies the key it was
    /// indexed under; filter gating applies to each side independently. A
    /// no-op when both sides resolve to the same key.
    pub fn update(&self, row: &Arc<R>) -> CoreResult<()> {
        let Some(previous) = row.version(RowVersion::Previous) else {
            return Err(CoreError::invalid_operation(format!(
                "row has no previous version to update in index {}",
                self.name
            )));
        };
        let previous_key = if self.admits(&previous) {
            Some(self.key_of(&previous)?)
        } else {
            None
        };
        let current_key = if self.admits(row) {
            Some(self.key_of(row)?)
        } else {
            None
        };
        if previous_key == current_key {
            return Ok(());
        }
        {
            let mut state = self.state.lock();
            if let Some(key) = &current_key {
                if state.rows.contains_key(key) {
                    return Err(CoreError::duplicate_key(&self.name, key));
                }
            }
            if let Some(key) = &previous_key {
                if let Some(stored) = state.rows.remove(key) {
                    state.undo.push(UndoRecord::Restore {
                        key: key.clone(),
                        row: stored,
                    });
                }
            }
            if let Some(key) = &current_key {
                state.rows.insert(key.clone(), Arc::clone(row));
                state.undo.push(UndoRecord::Drop { key: key.clone() });
            }
        }
        self.changed.emit(&ChangeEvent {
            action: ChangeAction::Update,
            previous: previous_key,
            current: current_key,
        })
    }

    /// Whether a key is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().rows.contains_key(key)
    }

    /// Looks up the row mapped to a key.
    #[must_use]
    pub fn find(&self, key: &K) -> Option<Arc<R>> {
        self.state.lock().rows.get(key).cloned()
    }

    /// Looks up a row that must exist.
    ///
    /// Fails with [`CoreError::RecordNotFound`] when the key is absent.
    pub fn get(&self, key: &K) -> CoreResult<Arc<R>> {
        self.find(key)
            .ok_or_else(|| CoreError::record_not_found(&self.name, key))
    }

    /// Registers a change subscriber.
    pub fn on_changed<F>(&self, subscriber: F)
    where
        F: Fn(&ChangeEvent<K>) -> CoreResult<()> + Send + Sync + 'static,
    {
        self.changed.subscribe(subscriber);
    }

    /// Returns the number of change subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.changed.subscriber_count()
    }
}

impl<K: IndexKey, R: Row> Lockable for UniqueIndex<K, R> {
    fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
        Some(self)
    }
}

impl<K: IndexKey, R: Row> IndexHandle for UniqueIndex<K, R> {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.state.lock().rows.len()
    }
}

impl<K: IndexKey, R: Row> TransactionParticipant for UniqueIndex<K, R> {
    fn prepare(&self) -> PrepareVote {
        if self.state.lock().undo.is_empty() {
            PrepareVote::Done
        } else {
            PrepareVote::Prepared
        }
    }

    fn commit(&self) {
        self.state.lock().undo.clear();
    }

    fn rollback(&self) {
        let mut state = self.state.lock();
        while let Some(record) = state.undo.pop() {
            match record {
                UndoRecord::Restore { key, row } => {
                    state.rows.insert(key, row);
                }
                UndoRecord::Drop { key } => {
                    state.rows.remove(&key);
                }
            }
        }
    }
}

impl<K: IndexKey, R: Row> std::fmt::Debug for UniqueIndex<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("name", &self.name)
            .field("len", &self.state.lock().rows.len())
            .finish_non_exhaustive()
    }
}
