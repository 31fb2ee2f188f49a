//! Stress harnesses for lock contention and writer priority.

use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tabula_core::{ReaderWriterLock, Timeout};

/// Outcome of a contention run.
#[derive(Debug, Clone)]
pub struct ContentionReport {
    /// Rounds executed.
    pub rounds: usize,
    /// Observed violations of the exclusion invariants.
    pub violations: usize,
}

/// Runs the writer-priority race once and reports whether the queued writer
/// finished before the queued reader.
///
/// Sequence: a writer holds the lock; a second writer queues; a reader
/// arrives after the second writer announced intent; the held writer
/// releases. Writer priority requires the second writer to complete first.
pub async fn writer_beats_reader_once() -> bool {
    let lock = Arc::new(ReaderWriterLock::new());
    let sequence = Arc::new(AtomicUsize::new(0));

    lock.enter_write(Timeout::Immediate).unwrap();

    let writer = {
        let lock = Arc::clone(&lock);
        let sequence = Arc::clone(&sequence);
        tokio::spawn(async move {
            lock.enter_write_async(Timeout::Infinite, &Default::default())
                .await
                .unwrap();
            let position = sequence.fetch_add(1, Ordering::SeqCst);
            lock.exit_write().unwrap();
            position
        })
    };
    while lock.pending_writers() == 0 {
        tokio::task::yield_now().await;
    }

    let reader = {
        let lock = Arc::clone(&lock);
        let sequence = Arc::clone(&sequence);
        tokio::spawn(async move {
            lock.enter_read_async(Timeout::Infinite, &Default::default())
                .await
                .unwrap();
            let position = sequence.fetch_add(1, Ordering::SeqCst);
            lock.exit_read().unwrap();
            position
        })
    };

    lock.exit_write().unwrap();
    let writer_position = writer.await.unwrap();
    let reader_position = reader.await.unwrap();
    writer_position < reader_position
}

/// Repeats the writer-priority race.
pub async fn writer_priority_storm(rounds: usize) -> ContentionReport {
    let mut violations = 0;
    for _ in 0..rounds {
        if !writer_beats_reader_once().await {
            violations += 1;
        }
    }
    ContentionReport { rounds, violations }
}

/// Hammers one lock with blocking writer threads and suspending reader
/// tasks, checking the exclusion invariants on every hold.
///
/// Occupancy accounting: a writer adds 1000, a reader adds 1. A writer must
/// observe exactly its own 1000; a reader must never observe a writer's
/// contribution.
pub async fn mixed_contention_storm(
    writer_threads: usize,
    reader_tasks: usize,
    rounds: usize,
) -> ContentionReport {
    let lock = Arc::new(ReaderWriterLock::new());
    let occupancy = Arc::new(AtomicIsize::new(0));
    let violations = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..writer_threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let occupancy = Arc::clone(&occupancy);
            let violations = Arc::clone(&violations);
            thread::spawn(move || {
                for _ in 0..rounds {
                    lock.enter_write(Timeout::Infinite).unwrap();
                    let seen = occupancy.fetch_add(1000, Ordering::SeqCst) + 1000;
                    if seen != 1000 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    occupancy.fetch_sub(1000, Ordering::SeqCst);
                    lock.exit_write().unwrap();
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..reader_tasks)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let occupancy = Arc::clone(&occupancy);
            let violations = Arc::clone(&violations);
            tokio::spawn(async move {
                for _ in 0..rounds {
                    lock.enter_read_async(Timeout::Infinite, &Default::default())
                        .await
                        .unwrap();
                    let seen = occupancy.fetch_add(1, Ordering::SeqCst) + 1;
                    if seen >= 1000 {
                        violations.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::task::yield_now().await;
                    occupancy.fetch_sub(1, Ordering::SeqCst);
                    lock.exit_read().unwrap();
                }
            })
        })
        .collect();

    for reader in readers {
        reader.await.unwrap();
    }
    for writer in writers {
        writer.join().unwrap();
    }

    ContentionReport {
        rounds,
        violations: violations.load(Ordering::SeqCst),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn writer_priority_holds_over_a_thousand_rounds() {
        let report = writer_priority_storm(1000).await;
        assert_eq!(report.violations, 0, "report: {report:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exclusion_invariants_hold_under_mixed_contention() {
        let report = mixed_contention_storm(3, 8, 200).await;
        assert_eq!(report.violations, 0, "report: {report:?}");
    }
}
