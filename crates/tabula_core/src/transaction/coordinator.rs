//! Minimal ambient two-phase-commit coordinator.

use crate::error::{CoreError, CoreResult};
use crate::transaction::participant::{PrepareVote, TransactionParticipant};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Global transaction ID counter.
static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// The transaction is active and accepts enlistments.
    Active,
    /// The transaction has been committed.
    Committed,
    /// The transaction has been rolled back.
    RolledBack,
}

struct TransactionInner {
    state: TransactionState,
    participants: Vec<Arc<dyn TransactionParticipant>>,
    /// Participant identities already enlisted, so a resource locked in both
    /// modes within one scope finalizes once.
    seen: HashSet<usize>,
}

/// A single-process two-phase-commit coordinator.
///
/// Participants enlist while the transaction is active. `commit` runs the
/// prepare phase over every participant and then the commit phase over those
/// that voted [`PrepareVote::Prepared`]; `rollback` runs the rollback phase
/// over every participant in reverse enlistment order, which makes rollback
/// inverse to forward execution.
pub struct Transaction {
    id: u64,
    inner: Mutex<TransactionInner>,
}

impl Transaction {
    /// Begins a new transaction.
    pub fn begin() -> Self {
        Self {
            id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst),
            inner: Mutex::new(TransactionInner {
                state: TransactionState::Active,
                participants: Vec::new(),
                seen: HashSet::new(),
            }),
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Returns the current state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Returns true while the transaction accepts enlistments.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == TransactionState::Active
    }

    /// Returns the number of enlisted participants.
    #[must_use]
    pub fn participant_count(&self) -> usize {
        self.inner.lock().participants.len()
    }

    /// Enlists a participant for finalization.
    ///
    /// Enlisting the same participant again is a no-op.
    pub fn enlist_volatile(&self, participant: Arc<dyn TransactionParticipant>) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_operation("transaction is not active"));
        }
        let identity = Arc::as_ptr(&participant) as *const () as usize;
        if inner.seen.insert(identity) {
            inner.participants.push(participant);
        }
        Ok(())
    }

    /// Commits: prepare every participant, then commit the prepared ones.
    pub fn commit(&self) -> CoreResult<()> {
        let participants = self.finalize(TransactionState::Committed)?;
        let votes: Vec<PrepareVote> = participants.iter().map(|p| p.prepare()).collect();
        for (participant, vote) in participants.iter().zip(votes) {
            if vote == PrepareVote::Prepared {
                participant.commit();
            }
        }
        tracing::debug!(
            txid = self.id,
            participants = participants.len(),
            "transaction committed"
        );
        Ok(())
    }

    /// Rolls back every participant in reverse enlistment order.
    pub fn rollback(&self) -> CoreResult<()> {
        let participants = self.finalize(TransactionState::RolledBack)?;
        for participant in participants.iter().rev() {
            participant.rollback();
        }
        tracing::debug!(
            txid = self.id,
            participants = participants.len(),
            "transaction rolled back"
        );
        Ok(())
    }

    /// Moves an active transaction into `target` and takes its participants.
    fn finalize(
        &self,
        target: TransactionState,
    ) -> CoreResult<Vec<Arc<dyn TransactionParticipant>>> {
        let mut inner = self.inner.lock();
        if inner.state != TransactionState::Active {
            return Err(CoreError::invalid_operation("transaction is not active"));
        }
        inner.state = target;
        Ok(std::mem::take(&mut inner.participants))
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("participants", &self.participant_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    /// Participant that records the callbacks it receives.
    struct Recorder {
        vote: PrepareVote,
        calls: PlMutex<Vec<&'static str>>,
    }

    impl Recorder {
        fn new(vote: PrepareVote) -> Arc<Self> {
            Arc::new(Self {
                vote,
                calls: PlMutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }
    }

    impl TransactionParticipant for Recorder {
        fn prepare(&self) -> PrepareVote {
            self.calls.lock().push("prepare");
            self.vote
        }

        fn commit(&self) {
            self.calls.lock().push("commit");
        }

        fn rollback(&self) {
            self.calls.lock().push("rollback");
        }
    }

    #[test]
    fn ids_increase() {
        let a = Transaction::begin();
        let b = Transaction::begin();
        assert!(b.id() > a.id());
    }

    #[test]
    fn commit_runs_both_phases_for_prepared() {
        let txn = Transaction::begin();
        let participant = Recorder::new(PrepareVote::Prepared);
        txn.enlist_volatile(participant.clone()).unwrap();

        txn.commit().unwrap();
        assert_eq!(participant.calls(), vec!["prepare", "commit"]);
        assert_eq!(txn.state(), TransactionState::Committed);
    }

    #[test]
    fn read_only_participant_skips_phase_two() {
        let txn = Transaction::begin();
        let participant = Recorder::new(PrepareVote::Done);
        txn.enlist_volatile(participant.clone()).unwrap();

        txn.commit().unwrap();
        assert_eq!(participant.calls(), vec!["prepare"]);
    }

    #[test]
    fn rollback_runs_in_reverse_enlistment_order() {
        let txn = Transaction::begin();
        let order = Arc::new(PlMutex::new(Vec::new()));

        struct Ordered {
            label: &'static str,
            order: Arc<PlMutex<Vec<&'static str>>>,
        }
        impl TransactionParticipant for Ordered {
            fn prepare(&self) -> PrepareVote {
                PrepareVote::Prepared
            }
            fn commit(&self) {}
            fn rollback(&self) {
                self.order.lock().push(self.label);
            }
        }

        for label in ["first", "second", "third"] {
            txn.enlist_volatile(Arc::new(Ordered {
                label,
                order: Arc::clone(&order),
            }))
            .unwrap();
        }

        txn.rollback().unwrap();
        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
        assert_eq!(txn.state(), TransactionState::RolledBack);
    }

    #[test]
    fn duplicate_enlistment_is_deduplicated() {
        let txn = Transaction::begin();
        let participant = Recorder::new(PrepareVote::Prepared);
        txn.enlist_volatile(participant.clone()).unwrap();
        txn.enlist_volatile(participant.clone()).unwrap();
        assert_eq!(txn.participant_count(), 1);

        txn.rollback().unwrap();
        assert_eq!(participant.calls(), vec!["rollback"]);
    }

    #[test]
    fn finalized_transaction_rejects_everything() {
        let txn = Transaction::begin();
        txn.commit().unwrap();

        assert!(txn.commit().is_err());
        assert!(txn.rollback().is_err());
        assert!(txn
            .enlist_volatile(Recorder::new(PrepareVote::Done))
            .is_err());
    }
}
