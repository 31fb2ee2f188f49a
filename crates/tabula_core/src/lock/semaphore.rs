//! Counting semaphore acquirable by both blocking and suspending callers.
//!
//! The reader/writer lock coordinates through two of these gates. A single
//! gate may have threads parked on its condvar and futures parked on its
//! waker registry at the same time, so every release wakes both populations
//! and waiters re-check the permit count under the state mutex.

use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

/// A semaphore wait that ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WaitTimedOut;

struct SemaphoreState {
    permits: usize,
    next_waiter: u64,
    /// Suspended waiters, keyed so a dropped future can deregister itself.
    wakers: HashMap<u64, Waker>,
}

/// Counting semaphore with blocking and suspending acquisition.
pub(crate) struct Semaphore {
    state: Mutex<SemaphoreState>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `permits` permits.
    pub(crate) fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(SemaphoreState {
                permits,
                next_waiter: 0,
                wakers: HashMap::new(),
            }),
            available: Condvar::new(),
        }
    }

    /// Takes a permit if one is available right now.
    pub(crate) fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Blocks the calling thread until a permit is taken or `deadline` passes.
    pub(crate) fn acquire(&self, deadline: Option<Instant>) -> Result<(), WaitTimedOut> {
        let mut state = self.state.lock();
        loop {
            if state.permits > 0 {
                state.permits -= 1;
                return Ok(());
            }
            match deadline {
                None => self.available.wait(&mut state),
                Some(deadline) => {
                    if self.available.wait_until(&mut state, deadline).timed_out() {
                        // A release may have landed together with the timeout.
                        if state.permits > 0 {
                            state.permits -= 1;
                            return Ok(());
                        }
                        return Err(WaitTimedOut);
                    }
                }
            }
        }
    }

    /// Suspends until a permit is taken.
    ///
    /// Dropping the returned future before completion deregisters its waker,
    /// leaving the semaphore untouched.
    pub(crate) fn acquire_async(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            waiter: None,
        }
    }

    /// Returns `count` permits and wakes every waiter.
    pub(crate) fn release(&self, count: usize) {
        if count == 0 {
            return;
        }
        let mut state = self.state.lock();
        state.permits += count;
        let wakers: Vec<Waker> = state.wakers.drain().map(|(_, w)| w).collect();
        drop(state);
        self.available.notify_all();
        for waker in wakers {
            waker.wake();
        }
    }

    #[cfg(test)]
    pub(crate) fn permits(&self) -> usize {
        self.state.lock().permits
    }
}

/// Future returned by [`Semaphore::acquire_async`].
pub(crate) struct Acquire<'a> {
    semaphore: &'a Semaphore,
    waiter: Option<u64>,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let mut state = this.semaphore.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            if let Some(key) = this.waiter.take() {
                state.wakers.remove(&key);
            }
            return Poll::Ready(());
        }
        let key = *this.waiter.get_or_insert_with(|| {
            state.next_waiter += 1;
            state.next_waiter
        });
        state.wakers.insert(key, cx.waker().clone());
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if let Some(key) = self.waiter {
            self.semaphore.state.lock().wakers.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_acquire_consumes_permit() {
        let sem = Semaphore::new(1);
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release(1);
        assert!(sem.try_acquire());
    }

    #[test]
    fn acquire_times_out_without_permit() {
        let sem = Semaphore::new(0);
        let deadline = Instant::now() + Duration::from_millis(50);
        assert_eq!(sem.acquire(Some(deadline)), Err(WaitTimedOut));
        assert_eq!(sem.permits(), 0);
    }

    #[test]
    fn release_unblocks_waiting_thread() {
        let sem = Arc::new(Semaphore::new(0));
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(None))
        };
        thread::sleep(Duration::from_millis(20));
        sem.release(1);
        assert_eq!(waiter.join().unwrap(), Ok(()));
    }

    #[test]
    fn release_many_unblocks_many() {
        let sem = Arc::new(Semaphore::new(0));
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.acquire(None))
            })
            .collect();
        thread::sleep(Duration::from_millis(20));
        sem.release(4);
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(()));
        }
        assert_eq!(sem.permits(), 0);
    }

    #[tokio::test]
    async fn acquire_async_waits_for_release() {
        let sem = Arc::new(Semaphore::new(0));
        let task = {
            let sem = Arc::clone(&sem);
            tokio::spawn(async move { sem.acquire_async().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        sem.release(1);
        task.await.unwrap();
        assert_eq!(sem.permits(), 0);
    }

    #[tokio::test]
    async fn dropped_future_leaves_no_waiter() {
        let sem = Semaphore::new(0);
        {
            let mut acquire = Box::pin(sem.acquire_async());
            // Poll once so the waiter registers, then drop it.
            futures_poll_once(acquire.as_mut()).await;
        }
        assert!(sem.state.lock().wakers.is_empty());
        sem.release(1);
        assert_eq!(sem.permits(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn mixed_blocking_and_suspending_waiters() {
        let sem = Arc::new(Semaphore::new(0));
        let blocking = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.acquire(None))
        };
        let suspending = {
            let sem = Arc::clone(&sem);
            tokio::spawn(async move { sem.acquire_async().await })
        };
        thread::sleep(Duration::from_millis(20));
        sem.release(2);
        assert_eq!(blocking.join().unwrap(), Ok(()));
        suspending.await.unwrap();
    }

    /// Polls a future exactly once against a noop-adjacent waker.
    async fn futures_poll_once(fut: Pin<&mut impl Future<Output = ()>>) {
        struct PollOnce<'a, F>(Option<Pin<&'a mut F>>);
        impl<F: Future<Output = ()>> Future for PollOnce<'_, F> {
            type Output = ();
            fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
                if let Some(inner) = self.0.take() {
                    let _ = inner.poll(cx);
                }
                Poll::Ready(())
            }
        }
        PollOnce(Some(fut)).await;
    }
}
