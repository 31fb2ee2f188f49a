//! Reader/writer locking with strict writer priority.
//!
//! [`ReaderWriterLock`] admits any number of concurrent readers or a single
//! exclusive writer. A writer that announces intent takes priority over every
//! reader that has not yet been admitted, even when that delays readers
//! indefinitely. Every acquisition exists in a blocking and a suspending
//! variant, and both operate on the same shared state, so a single lock can
//! serve threads and tasks at once.
//!
//! The lock is non-recursive. [`TransactionScope`](crate::TransactionScope)
//! simulates recursion by deduplicating acquisitions per scope.

mod semaphore;

use crate::error::{CoreError, CoreResult};
use crate::transaction::TransactionParticipant;
use parking_lot::Mutex;
use semaphore::Semaphore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// How long an acquisition may wait for the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Timeout {
    /// Wait until the lock is granted.
    #[default]
    Infinite,
    /// Take the lock only if it is free right now.
    Immediate,
    /// Wait at most this long.
    After(Duration),
}

impl Timeout {
    /// Maps a millisecond count onto a timeout.
    ///
    /// `-1` means infinite and `0` means an immediate try. Any other negative
    /// value is rejected with [`CoreError::InvalidTimeout`].
    pub fn from_millis(millis: i64) -> CoreResult<Self> {
        match millis {
            -1 => Ok(Self::Infinite),
            0 => Ok(Self::Immediate),
            ms if ms > 0 => Ok(Self::After(Duration::from_millis(ms as u64))),
            ms => Err(CoreError::InvalidTimeout { millis: ms }),
        }
    }

    fn deadline(self) -> Option<Instant> {
        match self {
            Self::Infinite => None,
            Self::Immediate => Some(Instant::now()),
            Self::After(duration) => Some(Instant::now() + duration),
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        Self::After(duration)
    }
}

/// A resource the transaction scope can lock and enlist uniformly.
pub trait Lockable: Send + Sync {
    /// Returns the reader/writer lock guarding this resource.
    fn lock(&self) -> &ReaderWriterLock;

    /// Returns this resource's two-phase-commit facet, if it has one.
    ///
    /// Resources without transactional state return `None` and are locked
    /// but never enlisted.
    fn as_participant(self: Arc<Self>) -> Option<Arc<dyn TransactionParticipant>> {
        None
    }
}

/// Bookkeeping for the writer currently admitted through the writer gate.
///
/// Readers arriving during this window queue on `reader_gate`; when the last
/// writer of a contiguous writer sequence exits, the gate is released once
/// per queued reader so they all proceed together.
struct WriteWindow {
    /// Whether a writer currently owns the window. An inactive window is
    /// left behind by an exiting writer for the next pending writer to adopt.
    active: bool,
    /// Whether the owning writer is still waiting for admitted readers to
    /// drain out.
    draining: bool,
    /// Readers queued behind this window.
    waiting_readers: usize,
    /// Gate the queued readers wait on, created on first demand.
    reader_gate: Option<Arc<Semaphore>>,
}

impl WriteWindow {
    fn new() -> Self {
        Self {
            active: true,
            draining: false,
            waiting_readers: 0,
            reader_gate: None,
        }
    }
}

struct LockState {
    active_readers: usize,
    pending_writers: usize,
    write_window: Option<WriteWindow>,
}

/// Outcome of a writer's announcement at the state mutex.
enum Admission {
    /// The writer gate was free; the window is open. `drain` reports whether
    /// admitted readers still have to exit.
    Granted {
        /// Whether the caller must wait on the reader-drain gate.
        drain: bool,
    },
    /// Another writer holds the gate; the caller must wait on it.
    Wait,
}

/// Asynchronous multi-reader / single-writer lock with writer preference.
///
/// Coordination runs through two gates and a short state mutex:
/// the writer gate (one permit) serializes writer candidates, and the
/// reader-drain gate (zero permits) parks an admitted writer until the last
/// concurrent reader has exited. Timed-out and cancelled waits rewind the
/// bookkeeping exactly, leaving the lock as if the attempt never happened.
pub struct ReaderWriterLock {
    writer_gate: Semaphore,
    reader_drain: Semaphore,
    state: Mutex<LockState>,
}

impl ReaderWriterLock {
    /// Creates an unlocked lock.
    pub fn new() -> Self {
        Self {
            writer_gate: Semaphore::new(1),
            reader_drain: Semaphore::new(0),
            state: Mutex::new(LockState {
                active_readers: 0,
                pending_writers: 0,
                write_window: None,
            }),
        }
    }

    // === Shared mode ===

    /// Acquires shared mode, blocking the calling thread.
    pub fn enter_read(&self, timeout: Timeout) -> CoreResult<()> {
        let deadline = timeout.deadline();
        loop {
            let Some(gate) = self.begin_read() else {
                return Ok(());
            };
            if gate.acquire(deadline).is_err() {
                self.rewind_reader_wait(&gate);
                return Err(CoreError::LockTimeout);
            }
            // Woken by a writer teardown; re-check for a newer writer.
        }
    }

    /// Acquires shared mode, suspending the calling task.
    pub async fn enter_read_async(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let deadline = timeout.deadline();
        loop {
            let Some(gate) = self.begin_read() else {
                return Ok(());
            };
            if let Err(err) = await_gate(&gate, deadline, cancel).await {
                self.rewind_reader_wait(&gate);
                return Err(err);
            }
        }
    }

    /// Attempts shared mode, reporting `false` instead of failing on timeout.
    pub fn try_enter_read(&self, timeout: Timeout) -> CoreResult<bool> {
        flatten_timeout(self.enter_read(timeout))
    }

    /// Suspending counterpart of [`try_enter_read`](Self::try_enter_read).
    pub async fn try_enter_read_async(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CoreResult<bool> {
        flatten_timeout(self.enter_read_async(timeout, cancel).await)
    }

    /// Releases shared mode.
    ///
    /// Fails with [`CoreError::InvalidLockState`] when no reader is active.
    pub fn exit_read(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        if state.active_readers == 0 {
            return Err(CoreError::invalid_lock_state(
                "exit_read without a matching enter_read",
            ));
        }
        state.active_readers -= 1;
        if state.active_readers == 0
            && state.write_window.as_ref().is_some_and(|w| w.draining)
        {
            self.reader_drain.release(1);
        }
        Ok(())
    }

    // === Exclusive mode ===

    /// Acquires exclusive mode, blocking the calling thread.
    pub fn enter_write(&self, timeout: Timeout) -> CoreResult<()> {
        let deadline = timeout.deadline();
        let drain = match self.announce_writer() {
            Admission::Granted { drain } => drain,
            Admission::Wait => {
                if self.writer_gate.acquire(deadline).is_err() {
                    self.abandon_pending_writer();
                    return Err(CoreError::LockTimeout);
                }
                self.adopt_window()
            }
        };
        if drain {
            if self.reader_drain.acquire(deadline).is_err() {
                self.rewind_writer_drain();
                return Err(CoreError::LockTimeout);
            }
            self.finish_drain();
        }
        Ok(())
    }

    /// Acquires exclusive mode, suspending the calling task.
    pub async fn enter_write_async(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CoreResult<()> {
        let deadline = timeout.deadline();
        let drain = match self.announce_writer() {
            Admission::Granted { drain } => drain,
            Admission::Wait => {
                if let Err(err) = await_gate(&self.writer_gate, deadline, cancel).await {
                    self.abandon_pending_writer();
                    return Err(err);
                }
                self.adopt_window()
            }
        };
        if drain {
            if let Err(err) = await_gate(&self.reader_drain, deadline, cancel).await {
                self.rewind_writer_drain();
                return Err(err);
            }
            self.finish_drain();
        }
        Ok(())
    }

    /// Attempts exclusive mode, reporting `false` instead of failing on timeout.
    pub fn try_enter_write(&self, timeout: Timeout) -> CoreResult<bool> {
        flatten_timeout(self.enter_write(timeout))
    }

    /// Suspending counterpart of [`try_enter_write`](Self::try_enter_write).
    pub async fn try_enter_write_async(
        &self,
        timeout: Timeout,
        cancel: &CancellationToken,
    ) -> CoreResult<bool> {
        flatten_timeout(self.enter_write_async(timeout, cancel).await)
    }

    /// Releases exclusive mode.
    ///
    /// Fails with [`CoreError::InvalidLockState`] when no writer holds the
    /// lock.
    pub fn exit_write(&self) -> CoreResult<()> {
        let mut state = self.state.lock();
        let held = state
            .write_window
            .as_ref()
            .is_some_and(|w| w.active && !w.draining);
        if !held {
            return Err(CoreError::invalid_lock_state(
                "exit_write without a matching enter_write",
            ));
        }
        self.release_writer(&mut state);
        Ok(())
    }

    // === Introspection ===

    /// Whether at least one reader currently holds shared mode.
    #[must_use]
    pub fn is_read_locked(&self) -> bool {
        self.state.lock().active_readers > 0
    }

    /// Whether a writer currently holds exclusive mode.
    #[must_use]
    pub fn is_write_locked(&self) -> bool {
        self.state
            .lock()
            .write_window
            .as_ref()
            .is_some_and(|w| w.active && !w.draining)
    }

    /// Number of readers currently holding shared mode.
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.state.lock().active_readers
    }

    /// Number of writers waiting for admission.
    #[must_use]
    pub fn pending_writers(&self) -> usize {
        self.state.lock().pending_writers
    }

    // === Internal transitions, each a single critical section ===

    /// Admits the reader immediately or hands back the gate it must wait on.
    fn begin_read(&self) -> Option<Arc<Semaphore>> {
        let mut state = self.state.lock();
        match &mut state.write_window {
            None => {
                state.active_readers += 1;
                None
            }
            Some(window) => {
                let gate = Arc::clone(
                    window
                        .reader_gate
                        .get_or_insert_with(|| Arc::new(Semaphore::new(0))),
                );
                window.waiting_readers += 1;
                Some(gate)
            }
        }
    }

    /// Undoes a reader registration whose wait did not complete.
    fn rewind_reader_wait(&self, gate: &Arc<Semaphore>) {
        let mut state = self.state.lock();
        if let Some(window) = state.write_window.as_mut() {
            let same_window = window
                .reader_gate
                .as_ref()
                .is_some_and(|g| Arc::ptr_eq(g, gate));
            if same_window {
                window.waiting_readers -= 1;
            }
        }
    }

    /// Registers writer intent. When the writer gate is free the caller is
    /// admitted within the same critical section, so no reader can slip in
    /// between the announcement and the window opening.
    fn announce_writer(&self) -> Admission {
        let mut state = self.state.lock();
        state.pending_writers += 1;
        if self.writer_gate.try_acquire() {
            Admission::Granted {
                drain: Self::open_window(&mut state),
            }
        } else {
            Admission::Wait
        }
    }

    /// Completes admission after a wait on the writer gate. The window left
    /// behind by the previous writer is adopted; it cannot have been torn
    /// down because this writer still counts as pending.
    fn adopt_window(&self) -> bool {
        let mut state = self.state.lock();
        Self::open_window(&mut state)
    }

    /// Opens or reactivates the write window for an admitted writer and
    /// reports whether admitted readers still have to drain out.
    fn open_window(state: &mut LockState) -> bool {
        state.pending_writers -= 1;
        match state.write_window.as_mut() {
            Some(window) => window.active = true,
            None => state.write_window = Some(WriteWindow::new()),
        }
        if state.active_readers > 0 {
            if let Some(window) = state.write_window.as_mut() {
                window.draining = true;
            }
            true
        } else {
            false
        }
    }

    /// Rewinds a writer that timed out before passing the writer gate.
    fn abandon_pending_writer(&self) {
        let mut state = self.state.lock();
        state.pending_writers -= 1;
        // No writer is left to adopt an inactive window; release its readers.
        if state.pending_writers == 0
            && state.write_window.as_ref().is_some_and(|w| !w.active)
        {
            Self::teardown_window(&mut state);
        }
    }

    /// Marks the drain wait as over; the writer now owns the lock.
    fn finish_drain(&self) {
        let mut state = self.state.lock();
        if let Some(window) = state.write_window.as_mut() {
            window.draining = false;
        }
    }

    /// Rewinds a writer whose drain wait did not complete.
    fn rewind_writer_drain(&self) {
        let mut state = self.state.lock();
        // The last reader may have released the drain gate concurrently with
        // the timeout; consume the stray permit so the gate reads zero again.
        let _ = self.reader_drain.try_acquire();
        if let Some(window) = state.write_window.as_mut() {
            window.draining = false;
        }
        self.release_writer(&mut state);
    }

    /// Writer-exit bookkeeping: tear the window down when no writer is
    /// pending, otherwise leave it inactive for the next writer, then reopen
    /// the writer gate.
    fn release_writer(&self, state: &mut LockState) {
        if state.pending_writers == 0 {
            Self::teardown_window(state);
        } else if let Some(window) = state.write_window.as_mut() {
            window.active = false;
        }
        self.writer_gate.release(1);
    }

    /// Removes the window and releases every reader queued behind it.
    fn teardown_window(state: &mut LockState) {
        if let Some(window) = state.write_window.take() {
            if let Some(gate) = window.reader_gate {
                gate.release(window.waiting_readers);
            }
        }
    }
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ReaderWriterLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ReaderWriterLock")
            .field("active_readers", &state.active_readers)
            .field("pending_writers", &state.pending_writers)
            .field("write_locked", &state.write_window.is_some())
            .finish()
    }
}

/// Maps a timeout failure onto `Ok(false)` for the `try_*` variants.
fn flatten_timeout(result: CoreResult<()>) -> CoreResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(CoreError::LockTimeout) => Ok(false),
        Err(err) => Err(err),
    }
}

/// Waits on a gate with an optional deadline and a cancellation token.
///
/// Acquisition wins ties; a dropped wait deregisters itself from the gate.
async fn await_gate(
    gate: &Semaphore,
    deadline: Option<Instant>,
    cancel: &CancellationToken,
) -> CoreResult<()> {
    let mut acquire = gate.acquire_async();
    let expiry = async {
        match deadline {
            Some(deadline) => {
                tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await;
            }
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        biased;
        () = &mut acquire => Ok(()),
        () = cancel.cancelled() => Err(CoreError::WaitCancelled),
        () = expiry => Err(CoreError::LockTimeout),
    }
}
