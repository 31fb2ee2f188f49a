//! Locking transaction scope.

use crate::config::ScopeConfig;
use crate::error::{CoreError, CoreResult};
use crate::lock::{Lockable, Timeout};
use crate::transaction::coordinator::Transaction;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Returns the address a lockable is deduplicated by within a scope.
fn identity<L: ?Sized>(lockable: &Arc<L>) -> usize {
    Arc::as_ptr(lockable) as *const () as usize
}

/// A scope that unifies lock acquisition, two-phase-commit enlistment, and
/// cleanup.
///
/// The scope owns no rows; it owns the obligation to release every lock it
/// acquired. On drop the ambient transaction finalizes first (commit if
/// [`complete`](Self::complete) was called, rollback otherwise) and only
/// then are the scope's locks released, so participants finalize under the
/// same lock state their mutations ran under.
///
/// A lockable is acquired at most once per scope and mode; repeat requests
/// are no-ops. The underlying lock is non-recursive, and the scope's own
/// bookkeeping stands in for recursion. A lockable already held in reader
/// mode is not upgraded by a writer request: the writer request waits on the
/// lock like any other.
pub struct TransactionScope {
    transaction: Transaction,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    readers: Vec<Arc<dyn Lockable>>,
    reader_keys: HashSet<usize>,
    writers: Vec<Arc<dyn Lockable>>,
    writer_keys: HashSet<usize>,
    completed: bool,
}

impl TransactionScope {
    /// Opens a scope with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ScopeConfig::default())
    }

    /// Opens a scope from a configuration.
    pub fn with_config(config: ScopeConfig) -> Self {
        Self::build(
            config.lock_timeout.map(|t| Instant::now() + t),
            CancellationToken::new(),
        )
    }

    /// Opens a scope whose acquisitions share one deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout), CancellationToken::new())
    }

    /// Opens a scope without a deadline; the caller owns cancellation.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self::build(None, cancel)
    }

    fn build(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self {
            transaction: Transaction::begin(),
            cancel,
            deadline,
            readers: Vec::new(),
            reader_keys: HashSet::new(),
            writers: Vec::new(),
            writer_keys: HashSet::new(),
            completed: false,
        }
    }

    /// Acquires reader access to `lockable` for the lifetime of the scope.
    ///
    /// On first acquisition the lockable's participant facet, if any, is
    /// enlisted in the ambient transaction. A repeat request for a lockable
    /// already held in reader mode returns immediately.
    pub async fn wait_reader<L>(&mut self, lockable: &Arc<L>) -> CoreResult<()>
    where
        L: Lockable + 'static,
    {
        let key = identity(lockable);
        if self.reader_keys.contains(&key) {
            return Ok(());
        }
        let timeout = self.remaining()?;
        lockable.lock().enter_read_async(timeout, &self.cancel).await?;
        self.reader_keys.insert(key);
        self.readers.push(Arc::clone(lockable) as Arc<dyn Lockable>);
        self.enlist(lockable)
    }

    /// Acquires writer access to `lockable` for the lifetime of the scope.
    ///
    /// Deduplicated per scope exactly like [`wait_reader`](Self::wait_reader).
    pub async fn wait_writer<L>(&mut self, lockable: &Arc<L>) -> CoreResult<()>
    where
        L: Lockable + 'static,
    {
        let key = identity(lockable);
        if self.writer_keys.contains(&key) {
            return Ok(());
        }
        let timeout = self.remaining()?;
        lockable
            .lock()
            .enter_write_async(timeout, &self.cancel)
            .await?;
        self.writer_keys.insert(key);
        self.writers.push(Arc::clone(lockable) as Arc<dyn Lockable>);
        self.enlist(lockable)
    }

    /// Marks the scope for commit on drop.
    pub fn complete(&mut self) {
        self.completed = true;
    }

    /// Whether [`complete`](Self::complete) has been called.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Returns the ambient transaction.
    #[must_use]
    pub fn transaction(&self) -> &Transaction {
        &self.transaction
    }

    /// Number of lockables held in reader mode.
    #[must_use]
    pub fn reader_lock_count(&self) -> usize {
        self.readers.len()
    }

    /// Number of lockables held in writer mode.
    #[must_use]
    pub fn writer_lock_count(&self) -> usize {
        self.writers.len()
    }

    fn enlist<L>(&self, lockable: &Arc<L>) -> CoreResult<()>
    where
        L: Lockable + 'static,
    {
        match Arc::clone(lockable).as_participant() {
            Some(participant) => self.transaction.enlist_volatile(participant),
            None => Ok(()),
        }
    }

    /// Budget left on the scope's deadline, as a lock timeout.
    fn remaining(&self) -> CoreResult<Timeout> {
        match self.deadline {
            None => Ok(Timeout::Infinite),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    Err(CoreError::LockTimeout)
                } else {
                    Ok(Timeout::After(deadline - now))
                }
            }
        }
    }
}

impl Default for TransactionScope {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let result = if self.completed {
            self.transaction.commit()
        } else {
            self.transaction.rollback()
        };
        if let Err(err) = result {
            tracing::warn!(txid = self.transaction.id(), error = %err, "transaction finalization failed");
        }
        // Locks are released only after the transaction has finalized.
        for lockable in self.writers.drain(..) {
            if let Err(err) = lockable.lock().exit_write() {
                tracing::warn!(error = %err, "writer lock release failed");
            }
        }
        for lockable in self.readers.drain(..) {
            if let Err(err) = lockable.lock().exit_read() {
                tracing::warn!(error = %err, "reader lock release failed");
            }
        }
    }
}

impl std::fmt::Debug for TransactionScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionScope")
            .field("txid", &self.transaction.id())
            .field("readers", &self.readers.len())
            .field("writers", &self.writers.len())
            .field("completed", &self.completed)
            .finish()
    }
}
