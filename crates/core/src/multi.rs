//! Keyed aggregation of independent asynchronous operations.
//!
//! A batch call dispatches N operations at once, each with its own
//! completion barrier. [`MultiOp`] collects the waiting halves in submission
//! order and [`MultiOp::join`] waits on each in that order, producing a
//! [`MultiResult`] with one outcome per key.
//!
//! A failed operation never prevents the others from being waited on, so
//! every key has a definite outcome by the time the result is returned.

use indexmap::IndexMap;
use parking_lot::MutexGuard;

use crate::barrier::Waiter;
use crate::error::{Error, Result};

/// Outcomes of a batch, keyed by document key in submission order.
#[derive(Debug, Clone, PartialEq)]
pub struct MultiResult<T> {
    entries: IndexMap<String, Result<T>>,
}

impl<T> MultiResult<T> {
    /// Create an empty result.
    pub fn new() -> Self {
        Self {
            entries: IndexMap::new(),
        }
    }

    /// Record the outcome for `key`.
    ///
    /// A repeated key keeps its original position and takes the new outcome.
    pub fn insert(&mut self, key: impl Into<String>, outcome: Result<T>) {
        self.entries.insert(key.into(), outcome);
    }

    /// True if and only if every outcome is a success.
    ///
    /// An empty batch is trivially all okay.
    pub fn all_okay(&self) -> bool {
        self.entries.values().all(|outcome| outcome.is_ok())
    }

    /// Outcome for `key`.
    pub fn get(&self, key: &str) -> Option<&Result<T>> {
        self.entries.get(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch was empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over `(key, outcome)` pairs in submission order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Result<T>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys whose operation succeeded, with their values.
    pub fn successes(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().ok().map(|value| (k.as_str(), value)))
    }

    /// Keys whose operation failed, with their errors.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.entries
            .iter()
            .filter_map(|(k, v)| v.as_ref().err().map(|error| (k.as_str(), error)))
    }
}

impl<T> Default for MultiResult<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<(String, Result<T>)> for MultiResult<T> {
    fn from_iter<I: IntoIterator<Item = (String, Result<T>)>>(iter: I) -> Self {
        let mut result = MultiResult::new();
        for (key, outcome) in iter {
            result.insert(key, outcome);
        }
        result
    }
}

impl<T> IntoIterator for MultiResult<T> {
    type Item = (String, Result<T>);
    type IntoIter = indexmap::map::IntoIter<String, Result<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Pending batch: one waiter per submitted key.
pub struct MultiOp<T> {
    pending: Vec<(String, Waiter<T>)>,
}

impl<T> MultiOp<T> {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Create an empty batch with room for `capacity` operations.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            pending: Vec::with_capacity(capacity),
        }
    }

    /// Register the waiter of an already dispatched operation.
    pub fn push(&mut self, key: impl Into<String>, waiter: Waiter<T>) {
        self.pending.push((key.into(), waiter));
    }

    /// Number of registered operations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Whether no operations were registered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Wait for every operation, in submission order.
    pub fn join(self) -> MultiResult<T> {
        self.pending
            .into_iter()
            .map(|(key, waiter)| (key, waiter.wait()))
            .collect()
    }

    /// Wait for every operation while releasing `guard`.
    pub fn join_unlocked<S>(self, guard: &mut MutexGuard<'_, S>) -> MultiResult<T> {
        MutexGuard::unlocked(guard, || self.join())
    }
}

impl<T> Default for MultiOp<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::completion_barrier;
    use crate::error::ErrorCode;
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_join_waits_in_submission_order() {
        let mut batch = MultiOp::new();
        let mut completers = Vec::new();
        for key in ["a", "b", "c"] {
            let (completer, waiter) = completion_barrier::<String>();
            batch.push(key, waiter);
            completers.push((key, completer));
        }

        // Complete in reverse order from other threads
        let handles: Vec<_> = completers
            .into_iter()
            .rev()
            .enumerate()
            .map(|(i, (key, completer))| {
                thread::spawn(move || {
                    thread::sleep(Duration::from_millis(5 * i as u64));
                    if key == "b" {
                        completer.fail(Error::engine(ErrorCode::DocumentNotFound, "b"));
                    } else {
                        completer.fulfill(key.to_uppercase());
                    }
                })
            })
            .collect();

        let result = batch.join();
        for h in handles {
            h.join().unwrap();
        }

        let keys: Vec<&str> = result.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert!(!result.all_okay());
        assert_eq!(result.get("a").unwrap().as_ref().unwrap(), "A");
        assert!(result.get("b").unwrap().as_ref().unwrap_err().is_not_found());
        assert_eq!(result.get("c").unwrap().as_ref().unwrap(), "C");
        assert_eq!(result.successes().count(), 2);
        assert_eq!(result.failures().count(), 1);
    }

    #[test]
    fn test_join_unlocked_releases_lock_for_completers() {
        // Every completing thread needs the lock the joiner holds.
        let state = Arc::new(Mutex::new(Vec::new()));
        let mut guard = state.lock();
        let mut batch = MultiOp::new();
        let mut handles = Vec::new();
        for key in ["a", "b"] {
            let (completer, waiter) = completion_barrier();
            batch.push(key, waiter);
            let producer_state = Arc::clone(&state);
            handles.push(thread::spawn(move || {
                let mut seen = producer_state.lock();
                seen.push(key);
                completer.fulfill(seen.len());
            }));
        }

        let result = batch.join_unlocked(&mut guard);
        assert!(result.all_okay());
        assert_eq!(guard.len(), 2);
        let mut counts: Vec<usize> = result.successes().map(|(_, n)| *n).collect();
        counts.sort_unstable();
        assert_eq!(counts, vec![1, 2]);
        drop(guard);
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_empty_batch_is_all_okay() {
        let batch = MultiOp::<u32>::new();
        let result = batch.join();
        assert!(result.is_empty());
        assert!(result.all_okay());
    }

    #[test]
    fn test_duplicate_key_keeps_position() {
        let mut result = MultiResult::new();
        result.insert("x", Ok(1));
        result.insert("y", Ok(2));
        result.insert("x", Err(Error::internal("later")));
        let keys: Vec<&str> = result.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["x", "y"]);
        assert!(!result.all_okay());
    }

    proptest! {
        #[test]
        fn all_okay_iff_no_failures(outcomes in proptest::collection::vec(any::<bool>(), 0..32)) {
            let mut batch = MultiOp::new();
            for (i, ok) in outcomes.iter().enumerate() {
                let (completer, waiter) = completion_barrier::<usize>();
                if *ok {
                    completer.fulfill(i);
                } else {
                    completer.fail(Error::internal(format!("op {}", i)));
                }
                batch.push(format!("k{}", i), waiter);
            }
            let result = batch.join();
            prop_assert_eq!(result.len(), outcomes.len());
            prop_assert_eq!(result.all_okay(), outcomes.iter().all(|ok| *ok));
            prop_assert_eq!(result.failures().count(), outcomes.iter().filter(|ok| !**ok).count());
        }
    }
}
