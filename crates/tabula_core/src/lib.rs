//! # Tabula Core
//!
//! Transactional in-memory indexing engine for generated, strongly-typed
//! table and row code.
//!
//! This crate provides:
//! - A reader/writer lock with strict writer priority, acquirable by both
//!   blocking threads and suspending tasks
//! - Unique (primary) and foreign indexes with undo-log rollback
//! - Referential-integrity enforcement between parent and child indexes
//! - A locking transaction scope driving two-phase commit over every
//!   enlisted index and row
//!
//! Rows live entirely in process memory; nothing here touches a disk. The
//! engine holds `Arc` references to rows owned by external table code and
//! guards every index with its own lock.
//!
//! # Usage
//!
//! ```rust,ignore
//! let people = UniqueIndex::new("person_pk")
//!     .has_index(|row: &Person| row.id())
//!     .build();
//!
//! let mut scope = TransactionScope::with_timeout(Duration::from_secs(5));
//! scope.wait_writer(&people).await?;
//! people.add(&person)?;
//! scope.complete();
//! drop(scope); // two-phase commit, then lock release
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod index;
mod lock;
mod row;
mod transaction;

pub use config::ScopeConfig;
pub use error::{CoreError, CoreResult};
pub use index::events::{ChangeAction, ChangeChannel, ChangeEvent};
pub use index::{ForeignIndex, IndexHandle, IndexKey, UniqueIndex};
pub use lock::{Lockable, ReaderWriterLock, Timeout};
pub use row::{Row, RowVersion, Table};
pub use transaction::{
    PrepareVote, Transaction, TransactionParticipant, TransactionScope, TransactionState,
};
