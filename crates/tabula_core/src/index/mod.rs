//! Index structures and change notifications.

pub mod events;
mod foreign;
mod unique;

pub use foreign::ForeignIndex;
pub use unique::UniqueIndex;

use crate::lock::Lockable;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// A key a row can be indexed by.
///
/// Keys are opaque to the engine: any value-equality type with hashing and
/// debug formatting qualifies, so scalar, tuple, and string keys all work
/// without the core baking in a key type.
pub trait IndexKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static> IndexKey for T {}

/// Key extractor registered on an index.
pub(crate) type KeyFn<K, R> = Arc<dyn Fn(&R) -> K + Send + Sync>;

/// Row admission predicate registered on an index.
pub(crate) type FilterFn<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// Object-safe facet of an index, so a table can list indexes with
/// heterogeneous key and row types uniformly.
pub trait IndexHandle: Lockable {
    /// Returns the index name.
    fn name(&self) -> &str;

    /// Returns the number of rows held by the index.
    fn len(&self) -> usize;

    /// Returns true when the index holds no rows.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Versioned row fixture shared by the index and scope tests.
#[cfg(test)]
pub(crate) mod test_rows {
    use crate::lock::{Lockable, ReaderWriterLock};
    use crate::row::{Row, RowVersion};
    use crate::transaction::{PrepareVote, TransactionParticipant};
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) struct TestData {
        pub id: i64,
        pub group: Option<i64>,
    }

    pub(crate) struct TestRow {
        lock: ReaderWriterLock,
        data: Mutex<TestData>,
        previous: Mutex<Option<Arc<TestRow>>>,
    }

    impl TestRow {
        pub(crate) fn new(id: i64, group: Option<i64>) -> Arc<Self> {
            Arc::new(Self {
                lock: ReaderWriterLock::new(),
                data: Mutex::new(TestData { id, group }),
                previous: Mutex::new(None),
            })
        }

        pub(crate) fn id(&self) -> i64 {
            self.data.lock().id
        }

        pub(crate) fn group(&self) -> Option<i64> {
            self.data.lock().group
        }

        /// Snapshots the current state as the previous version, then applies
        /// a tentative change.
        pub(crate) fn stage(&self, change: impl FnOnce(&mut TestData)) {
            let snapshot = Arc::new(Self {
                lock: ReaderWriterLock::new(),
                data: Mutex::new(self.data.lock().clone()),
                previous: Mutex::new(None),
            });
            *self.previous.lock() = Some(snapshot);
            change(&mut self.data.lock());
        }
    }

    impl Row for TestRow {
        fn version(&self, version: RowVersion) -> Option<Arc<Self>> {
            match version {
                RowVersion::Previous => self.previous.lock().clone(),
                RowVersion::Original | RowVersion::Current => None,
            }
        }
    }

    impl Lockable for TestRow {
        fn lock(&self) -> &ReaderWriterLock {
            &self.lock
        }

        fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
            Some(self)
        }
    }

    impl TransactionParticipant for TestRow {
        fn prepare(&self) -> PrepareVote {
            if self.previous.lock().is_some() {
                PrepareVote::Prepared
            } else {
                PrepareVote::Done
            }
        }

        fn commit(&self) {
            *self.previous.lock() = None;
        }

        fn rollback(&self) {
            if let Some(snapshot) = self.previous.lock().take() {
                *self.data.lock() = snapshot.data.lock().clone();
            }
        }
    }
}
