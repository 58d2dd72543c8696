//! One-shot completion barrier.
//!
//! A barrier bridges a single asynchronous completion to a single blocking
//! caller. It is split into two halves:
//!
//! - [`Completer`] is moved into the completion handler and consumed by
//!   `fulfill`, `fail` or `complete`. Since every method takes `self`, a
//!   barrier can only ever be set once.
//! - [`Waiter`] stays with the caller and blocks until the value or error
//!   arrives.
//!
//! Dropping a `Completer` without completing it fails the barrier with a
//! cancellation error, so a waiter never hangs on a handler that was
//! discarded (for example a task abandoned by a stopped execution context).

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

struct Shared<T> {
    slot: Mutex<Option<Result<T>>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn set(&self, result: Result<T>) {
        let mut slot = self.slot.lock();
        debug_assert!(slot.is_none(), "completion barrier set twice");
        if slot.is_none() {
            *slot = Some(result);
            self.ready.notify_all();
        }
    }
}

/// Create a new barrier, returning its producer and consumer halves.
pub fn completion_barrier<T>() -> (Completer<T>, Waiter<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Completer {
            shared: Some(Arc::clone(&shared)),
        },
        Waiter { shared },
    )
}

/// Producer half of a completion barrier.
pub struct Completer<T> {
    shared: Option<Arc<Shared<T>>>,
}

impl<T> Completer<T> {
    /// Complete the barrier with a value.
    pub fn fulfill(self, value: T) {
        self.complete(Ok(value));
    }

    /// Complete the barrier with an error.
    pub fn fail(self, error: Error) {
        self.complete(Err(error));
    }

    /// Complete the barrier with either outcome.
    pub fn complete(mut self, result: Result<T>) {
        if let Some(shared) = self.shared.take() {
            shared.set(result);
        }
    }

    /// Whether the waiting half has been dropped.
    pub fn is_abandoned(&self) -> bool {
        self.shared
            .as_ref()
            .map_or(true, |shared| Arc::strong_count(shared) == 1)
    }
}

impl<T> Drop for Completer<T> {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.set(Err(Error::cancelled(
                "completion handler dropped before producing a result",
            )));
        }
    }
}

impl<T> std::fmt::Debug for Completer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completer")
            .field("abandoned", &self.is_abandoned())
            .finish()
    }
}

/// Consumer half of a completion barrier.
pub struct Waiter<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Waiter<T> {
    /// Block until the barrier is completed.
    pub fn wait(self) -> Result<T> {
        let mut slot = self.shared.slot.lock();
        loop {
            if let Some(result) = slot.take() {
                return result;
            }
            self.shared.ready.wait(&mut slot);
        }
    }

    /// Block until the barrier is completed, releasing `guard` meanwhile.
    ///
    /// The lock behind `guard` is reacquired before returning. Use this when
    /// the caller holds a lock that the completing thread may need.
    pub fn wait_unlocked<S>(self, guard: &mut MutexGuard<'_, S>) -> Result<T> {
        MutexGuard::unlocked(guard, || self.wait())
    }

    /// Block for at most `timeout`.
    ///
    /// On timeout the waiter is handed back so the caller can wait again.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<T>, Waiter<T>> {
        let deadline = Instant::now() + timeout;
        {
            let mut slot = self.shared.slot.lock();
            loop {
                if let Some(result) = slot.take() {
                    return Ok(result);
                }
                if self
                    .shared
                    .ready
                    .wait_until(&mut slot, deadline)
                    .timed_out()
                {
                    if let Some(result) = slot.take() {
                        return Ok(result);
                    }
                    break;
                }
            }
        }
        Err(self)
    }

    /// Whether a value or error is available without blocking.
    pub fn is_ready(&self) -> bool {
        self.shared.slot.lock().is_some()
    }
}

impl<T> std::fmt::Debug for Waiter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter")
            .field("ready", &self.is_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use std::thread;

    #[test]
    fn test_fulfill_from_other_thread() {
        let (completer, waiter) = completion_barrier();
        let handle = thread::spawn(move || completer.fulfill(42u64));
        assert_eq!(waiter.wait().unwrap(), 42);
        handle.join().unwrap();
    }

    #[test]
    fn test_fail_delivers_error() {
        let (completer, waiter) = completion_barrier::<u64>();
        completer.fail(Error::engine(ErrorCode::DocumentNotFound, "missing"));
        let err = waiter.wait().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dropped_completer_cancels_waiter() {
        let (completer, waiter) = completion_barrier::<u64>();
        thread::spawn(move || drop(completer)).join().unwrap();
        let err = waiter.wait().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_completed_before_wait() {
        let (completer, waiter) = completion_barrier();
        completer.fulfill("done");
        assert!(waiter.is_ready());
        assert_eq!(waiter.wait().unwrap(), "done");
    }

    #[test]
    fn test_wait_timeout_returns_waiter() {
        let (completer, waiter) = completion_barrier::<u32>();
        let waiter = match waiter.wait_timeout(Duration::from_millis(10)) {
            Ok(_) => panic!("barrier should not be ready"),
            Err(waiter) => waiter,
        };
        completer.fulfill(7);
        let result = waiter.wait_timeout(Duration::from_secs(5)).ok().unwrap();
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn test_abandoned_when_waiter_dropped() {
        let (completer, waiter) = completion_barrier::<u32>();
        assert!(!completer.is_abandoned());
        drop(waiter);
        assert!(completer.is_abandoned());
        completer.fulfill(1);
    }

    #[test]
    fn test_wait_unlocked_releases_lock_for_completer() {
        // The completing thread needs the same lock the waiter holds.
        let state = Arc::new(Mutex::new(0u32));
        let (completer, waiter) = completion_barrier();

        let mut guard = state.lock();
        let producer_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            let mut value = producer_state.lock();
            *value += 1;
            completer.fulfill(*value);
        });

        let seen = waiter.wait_unlocked(&mut guard).unwrap();
        assert_eq!(seen, 1);
        assert_eq!(*guard, 1);
        drop(guard);
        handle.join().unwrap();
    }
}
