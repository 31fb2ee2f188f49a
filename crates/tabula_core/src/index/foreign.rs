//! Foreign index: a set of rows per key, keyed into a parent unique index.

use crate::error::{CoreError, CoreResult};
use crate::index::events::ChangeAction;
use crate::index::unique::UniqueIndex;
use crate::index::{FilterFn, IndexHandle, IndexKey, KeyFn};
use crate::lock::{Lockable, ReaderWriterLock};
use crate::row::{Row, RowVersion};
use crate::transaction::{PrepareVote, TransactionParticipant};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Reverse-mutation record accumulated during a transaction.
enum UndoRecord<K, C> {
    /// Put a row back into its bucket.
    Restore { key: K, row: Arc<C> },
    /// Take a row out of its bucket again.
    Drop { key: K, row: Arc<C> },
}

struct ForeignState<K, C> {
    /// Bucket per parent key. Buckets are never empty: removing the last
    /// row removes the key.
    buckets: HashMap<K, Vec<Arc<C>>>,
    undo: Vec<UndoRecord<K, C>>,
}

/// Key→set-of-rows mapping whose keys must exist in a parent [`UniqueIndex`].
///
/// `P` is the parent row type, `C` the child row type; both sides share the
/// key type `K`. On [`build`](Self::build) the index subscribes to the
/// parent's change channel and vetoes any parent `Delete` or `Update` whose
/// outgoing key still has rows in a bucket here, so committed state can
/// never orphan children.
///
/// # Example
///
/// ```rust,ignore
/// let members = ForeignIndex::new("team_members", Arc::clone(&team_pk))
///     .has_index(|row: &Person| row.team().unwrap_or_default())
///     .has_filter(|row: &Person| row.team().is_some())
///     .build();
/// ```
pub struct ForeignIndex<K, P, C> {
    name: String,
    lock: ReaderWriterLock,
    parent: Arc<UniqueIndex<K, P>>,
    key_fn: Option<KeyFn<K, C>>,
    filter: FilterFn<C>,
    state: Arc<Mutex<ForeignState<K, C>>>,
}

impl<K: IndexKey, P: Row, C: Row> ForeignIndex<K, P, C> {
    /// Creates an unconfigured index tied to a parent unique index.
    pub fn new(name: impl Into<String>, parent: Arc<UniqueIndex<K, P>>) -> Self {
        Self {
            name: name.into(),
            lock: ReaderWriterLock::new(),
            parent,
            key_fn: None,
            filter: Arc::new(|_| true),
            state: Arc::new(Mutex::new(ForeignState {
                buckets: HashMap::new(),
                undo: Vec::new(),
            })),
        }
    }

    /// Registers the key extractor.
    #[must_use]
    pub fn has_index<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&C) -> K + Send + Sync + 'static,
    {
        self.key_fn = Some(Arc::new(key_fn));
        self
    }

    /// Registers the admission predicate.
    #[must_use]
    pub fn has_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&C) -> bool + Send + Sync + 'static,
    {
        self.filter = Arc::new(filter);
        self
    }

    /// Finishes configuration and subscribes to the parent's change channel.
    ///
    /// The subscription holds only a weak handle to this index's state, so
    /// the parent does not keep the foreign index alive.
    #[must_use]
    pub fn build(self) -> Arc<Self> {
        let index = Arc::new(self);
        let state = Arc::downgrade(&index.state);
        let name = index.name.clone();
        index.parent.on_changed(move |event| {
            let operation = match event.action {
                ChangeAction::Delete => "delete",
                ChangeAction::Update => "update",
                ChangeAction::Add | ChangeAction::Rollback => return Ok(()),
            };
            let Some(previous) = event.previous.as_ref() else {
                return Ok(());
            };
            let Some(state) = state.upgrade() else {
                return Ok(());
            };
            if state.lock().buckets.contains_key(previous) {
                return Err(CoreError::constraint_violation(operation, name.clone()));
            }
            Ok(())
        });
        index
    }

    /// Returns the index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the parent unique index.
    #[must_use]
    pub fn parent(&self) -> &Arc<UniqueIndex<K, P>> {
        &self.parent
    }

    /// Returns the key a child row is indexed by.
    pub fn key_of(&self, row: &C) -> CoreResult<K> {
        match &self.key_fn {
            Some(key_fn) => Ok(key_fn(row)),
            None => Err(CoreError::key_function_missing(&self.name)),
        }
    }

    /// Whether the filter admits a row into this index.
    pub fn admits(&self, row: &C) -> bool {
        (self.filter)(row)
    }

    /// Inserts a child row into the bucket for its key.
    ///
    /// Fails with [`CoreError::MissingParentKey`] when the parent index has
    /// no such key, and with [`CoreError::DuplicateKey`] when the row is
    /// already in the bucket.
    pub fn add(&self, row: &Arc<C>) -> CoreResult<()> {
        if !self.admits(row) {
            return Ok(());
        }
        let key = self.key_of(row)?;
        if !self.parent.contains(&key) {
            return Err(CoreError::missing_parent_key(&self.name, &key));
        }
        let mut state = self.state.lock();
        let bucket = state.buckets.entry(key.clone()).or_default();
        if bucket.iter().any(|stored| Arc::ptr_eq(stored, row)) {
            return Err(CoreError::duplicate_key(&self.name, &key));
        }
        bucket.push(Arc::clone(row));
        state.undo.push(UndoRecord::Drop {
            key,
            row: Arc::clone(row),
        });
        Ok(())
    }

    /// Removes a child row from the bucket for its key.
    ///
    /// Rows rejected by the filter or absent from their bucket are ignored.
    /// An emptied bucket is removed with its key.
    pub fn remove(&self, row: &Arc<C>) -> CoreResult<()> {
        if !self.admits(row) {
            return Ok(());
        }
        let key = self.key_of(row)?;
        let mut state = self.state.lock();
        let Some(bucket) = state.buckets.get_mut(&key) else {
            return Ok(());
        };
        let Some(position) = bucket.iter().position(|stored| Arc::ptr_eq(stored, row)) else {
            return Ok(());
        };
        let removed = bucket.remove(position);
        if bucket.is_empty() {
            state.buckets.remove(&key);
        }
        state.undo.push(UndoRecord::Restore { key, row: removed });
        Ok(())
    }

    /// Moves a child row whose pending change rekeyed it to another bucket.
    ///
    /// The previous side must be present in this index; the current side
    /// must exist in the parent. Undo records are pushed per step, so a
    /// failure between them still rolls back cleanly.
    pub fn update(&self, row: &Arc<C>) -> CoreResult<()> {
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
        if let Some(key) = previous_key {
            let mut state = self.state.lock();
            let Some(bucket) = state.buckets.get_mut(&key) else {
                return Err(CoreError::missing_parent_key(&self.name, &key));
            };
            if let Some(position) = bucket.iter().position(|stored| Arc::ptr_eq(stored, row)) {
                let removed = bucket.remove(position);
                if bucket.is_empty() {
                    state.buckets.remove(&key);
                }
                state.undo.push(UndoRecord::Restore { key, row: removed });
            }
        }
        if let Some(key) = current_key {
            if !self.parent.contains(&key) {
                return Err(CoreError::missing_parent_key(&self.name, &key));
            }
            let mut state = self.state.lock();
            let bucket = state.buckets.entry(key.clone()).or_default();
            if bucket.iter().any(|stored| Arc::ptr_eq(stored, row)) {
                return Err(CoreError::duplicate_key(&self.name, &key));
            }
            bucket.push(Arc::clone(row));
            state.undo.push(UndoRecord::Drop {
                key,
                row: Arc::clone(row),
            });
        }
        Ok(())
    }

    /// Returns the rows keyed by a parent row, empty when it has none.
    pub fn children_of(&self, parent_row: &Arc<P>) -> CoreResult<Vec<Arc<C>>> {
        let key = self.parent.key_of(parent_row)?;
        Ok(self
            .state
            .lock()
            .buckets
            .get(&key)
            .cloned()
            .unwrap_or_default())
    }

    /// Looks up the parent row of a child, absent when the parent index has
    /// no such key.
    pub fn parent_of(&self, child: &Arc<C>) -> CoreResult<Option<Arc<P>>> {
        if !self.admits(child) {
            return Ok(None);
        }
        let key = self.key_of(child)?;
        Ok(self.parent.find(&key))
    }

    /// Whether a child's parent exists.
    ///
    /// Rows the filter rejects are not indexed and report `true`.
    pub fn has_parent(&self, child: &Arc<C>) -> CoreResult<bool> {
        if !self.admits(child) {
            return Ok(true);
        }
        let key = self.key_of(child)?;
        Ok(self.parent.contains(&key))
    }

    /// Whether a key has at least one child row.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.state.lock().buckets.contains_key(key)
    }
}

impl<K: IndexKey, P: Row, C: Row> Lockable for ForeignIndex<K, P, C> {
    fn lock(&self) -> &ReaderWriterLock {
        &self.lock
    }

    fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
        Some(self)
    }
}

impl<K: IndexKey, P: Row, C: Row> IndexHandle for ForeignIndex<K, P, C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn len(&self) -> usize {
        self.state.lock().buckets.values().map(Vec::len).sum()
    }
}

impl<K: IndexKey, P: Row, C: Row> TransactionParticipant for ForeignIndex<K, P, C> {
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
                    state.buckets.entry(key).or_default().push(row);
                }
                UndoRecord::Drop { key, row } => {
                    if let Some(bucket) = state.buckets.get_mut(&key) {
                        if let Some(position) =
                            bucket.iter().position(|stored| Arc::ptr_eq(stored, &row))
                        {
                            bucket.remove(position);
                        }
                        if bucket.is_empty() {
                            state.buckets.remove(&key);
                        }
                    }
                }
            }
        }
    }
}

impl<K: IndexKey, P: Row, C: Row> std::fmt::Debug for ForeignIndex<K, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForeignIndex")
            .field("name", &self.name)
            .field("parent", &self.parent.name())
            .field("keys", &self.state.lock().buckets.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::test_rows::TestRow;

    /// Parent keyed by id, children keyed by their group.
    fn pair() -> (
        Arc<UniqueIndex<i64, TestRow>>,
        Arc<ForeignIndex<i64, TestRow, TestRow>>,
    ) {
        let parent = UniqueIndex::new("team_pk")
            .has_index(|row: &TestRow| row.id())
            .build();
        let foreign = ForeignIndex::new("team_members", Arc::clone(&parent))
            .has_index(|row: &TestRow| row.group().unwrap_or_default())
            .has_filter(|row: &TestRow| row.group().is_some())
            .build();
        (parent, foreign)
    }

    #[test]
    fn add_requires_parent_key() {
        let (parent, foreign) = pair();
        let child = TestRow::new(100, Some(7));

        assert!(matches!(
            foreign.add(&child),
            Err(CoreError::MissingParentKey { .. })
        ));

        parent.add(&TestRow::new(7, None)).unwrap();
        foreign.add(&child).unwrap();
        assert!(foreign.contains(&7));
    }

    #[test]
    fn same_row_twice_in_one_bucket_is_rejected() {
        let (parent, foreign) = pair();
        parent.add(&TestRow::new(7, None)).unwrap();
        let child = TestRow::new(100, Some(7));

        foreign.add(&child).unwrap();
        assert!(matches!(
            foreign.add(&child),
            Err(CoreError::DuplicateKey { .. })
        ));
        assert_eq!(foreign.len(), 1);
    }

    #[test]
    fn emptied_bucket_drops_its_key() {
        let (parent, foreign) = pair();
        parent.add(&TestRow::new(7, None)).unwrap();
        let child = TestRow::new(100, Some(7));

        foreign.add(&child).unwrap();
        foreign.remove(&child).unwrap();

        assert!(!foreign.contains(&7));
        assert!(foreign.is_empty());
    }

    #[test]
    fn filtered_children_are_invisible_but_have_a_parent() {
        let (_parent, foreign) = pair();
        let unassigned = TestRow::new(100, None);

        foreign.add(&unassigned).unwrap();
        assert!(foreign.is_empty());
        assert!(foreign.has_parent(&unassigned).unwrap());
        assert!(foreign.parent_of(&unassigned).unwrap().is_none());
    }

    #[test]
    fn children_and_parent_navigation() {
        let (parent, foreign) = pair();
        let team = TestRow::new(7, None);
        parent.add(&team).unwrap();

        let first = TestRow::new(100, Some(7));
        let second = TestRow::new(101, Some(7));
        foreign.add(&first).unwrap();
        foreign.add(&second).unwrap();

        let children = foreign.children_of(&team).unwrap();
        assert_eq!(children.len(), 2);
        assert!(Arc::ptr_eq(
            &foreign.parent_of(&first).unwrap().unwrap(),
            &team
        ));
    }

    #[test]
    fn parent_delete_with_children_is_vetoed() {
        let (parent, foreign) = pair();
        let team = TestRow::new(7, None);
        parent.add(&team).unwrap();
        foreign.add(&TestRow::new(100, Some(7))).unwrap();

        let result = parent.remove(&team);
        assert!(matches!(
            result,
            Err(CoreError::ConstraintViolation {
                operation: "delete",
                ..
            })
        ));

        // The parent's own undo restores its map; the veto happened after
        // the mutation, inside the same call.
        parent.rollback();
        assert!(Arc::ptr_eq(&parent.find(&7).unwrap(), &team));
    }

    #[test]
    fn parent_rekey_with_children_is_vetoed() {
        let (parent, foreign) = pair();
        let team = TestRow::new(7, None);
        parent.add(&team).unwrap();
        foreign.add(&TestRow::new(100, Some(7))).unwrap();
        parent.commit();

        team.stage(|data| data.id = 8);
        assert!(matches!(
            parent.update(&team),
            Err(CoreError::ConstraintViolation {
                operation: "update",
                ..
            })
        ));

        parent.rollback();
        assert!(parent.contains(&7));
        assert!(!parent.contains(&8));
    }

    #[test]
    fn childless_parent_delete_passes() {
        let (parent, foreign) = pair();
        let team = TestRow::new(7, None);
        parent.add(&team).unwrap();
        let child = TestRow::new(100, Some(7));
        foreign.add(&child).unwrap();
        foreign.remove(&child).unwrap();

        parent.remove(&team).unwrap();
        assert!(!parent.contains(&7));
        assert!(foreign.is_empty());
    }

    #[test]
    fn update_moves_a_child_between_buckets() {
        let (parent, foreign) = pair();
        parent.add(&TestRow::new(7, None)).unwrap();
        parent.add(&TestRow::new(8, None)).unwrap();
        let child = TestRow::new(100, Some(7));
        foreign.add(&child).unwrap();

        child.stage(|data| data.group = Some(8));
        foreign.update(&child).unwrap();

        assert!(!foreign.contains(&7));
        assert!(foreign.contains(&8));
    }

    #[test]
    fn update_to_unknown_parent_is_rejected() {
        let (parent, foreign) = pair();
        parent.add(&TestRow::new(7, None)).unwrap();
        let child = TestRow::new(100, Some(7));
        foreign.add(&child).unwrap();

        child.stage(|data| data.group = Some(99));
        assert!(matches!(
            foreign.update(&child),
            Err(CoreError::MissingParentKey { .. })
        ));

        // The previous-side removal is already journaled; rollback restores.
        foreign.rollback();
        assert!(foreign.contains(&7));
    }

    #[test]
    fn rollback_reverses_bucket_mutations() {
        let (parent, foreign) = pair();
        parent.add(&TestRow::new(7, None)).unwrap();
        let keep = TestRow::new(100, Some(7));
        foreign.add(&keep).unwrap();
        foreign.commit();

        let added = TestRow::new(101, Some(7));
        foreign.add(&added).unwrap();
        foreign.remove(&keep).unwrap();

        foreign.rollback();
        let team = parent.find(&7).unwrap();
        let children = foreign.children_of(&team).unwrap();
        assert_eq!(children.len(), 1);
        assert!(Arc::ptr_eq(&children[0], &keep));
    }

    #[test]
    fn dropped_foreign_index_unsubscribes_effectively() {
        let parent = UniqueIndex::new("team_pk")
            .has_index(|row: &TestRow| row.id())
            .build();
        let team = TestRow::new(7, None);
        parent.add(&team).unwrap();
        {
            let foreign: Arc<ForeignIndex<i64, TestRow, TestRow>> =
                ForeignIndex::new("team_members", Arc::clone(&parent))
                    .has_index(|row: &TestRow| row.group().unwrap_or_default())
                    .has_filter(|row: &TestRow| row.group().is_some())
                    .build();
            foreign.add(&TestRow::new(100, Some(7))).unwrap();
        }
        // The subscription only held the state weakly; the parent mutation
        // proceeds once the foreign index is gone.
        parent.remove(&team).unwrap();
        assert!(!parent.contains(&7));
    }
}
