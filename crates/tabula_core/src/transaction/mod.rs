//! Transaction coordination.
//!
//! [`Transaction`] is the minimal ambient two-phase-commit coordinator;
//! [`TransactionScope`] binds lock acquisition, enlistment, and finalization
//! into one unit that commits or rolls back on drop.

mod coordinator;
mod participant;
mod scope;

pub use coordinator::{Transaction, TransactionState};
pub use participant::{PrepareVote, TransactionParticipant};
pub use scope::TransactionScope;
