//! Row and table contracts.
//!
//! Generated table and row code implements these traits; the engine never
//! constructs or destroys rows itself. Indexes hold `Arc` references only.

use crate::index::IndexHandle;
use crate::lock::Lockable;
use crate::transaction::TransactionParticipant;
use std::sync::Arc;

/// Which snapshot of a row to retrieve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowVersion {
    /// The row as it was inserted.
    Original,
    /// The row before the current uncommitted change.
    Previous,
    /// The row including the current tentative change.
    Current,
}

/// A versioned record object held in process memory.
///
/// A row carries its own lock (so a scope can lock rows and indexes
/// uniformly) and participates in two-phase commit (so field-level changes
/// roll back together with the index entries derived from them).
///
/// Index `update` operations retrieve the [`RowVersion::Previous`] snapshot
/// to learn the key a row was indexed under before its pending change.
pub trait Row: Lockable + TransactionParticipant + Sized + 'static {
    /// Returns the snapshot of this row at `version`, if one exists.
    ///
    /// `Previous` is `None` outside of a pending change; `Original` is
    /// `None` only for rows created without snapshot support.
    fn version(&self, version: RowVersion) -> Option<Arc<Self>>;
}

/// A registry of rows and the indexes over them.
///
/// Tables are external collaborators: the engine only needs to enumerate a
/// table's indexes (to lock or enlist them uniformly) and its live rows.
pub trait Table: Lockable {
    /// The row type this table stores.
    type Row: Row;

    /// Returns the table name.
    fn name(&self) -> &str;

    /// Returns the table's unique indexes.
    fn unique_indexes(&self) -> Vec<Arc<dyn IndexHandle>>;

    /// Returns the table's foreign indexes.
    fn foreign_indexes(&self) -> Vec<Arc<dyn IndexHandle>>;

    /// Returns the table's live rows.
    fn rows(&self) -> Vec<Arc<Self::Row>>;
}
