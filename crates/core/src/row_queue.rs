//! Producer/consumer row queue for streaming results.
//!
//! The engine delivers streaming results (query rows, view rows, replica
//! reads) through repeated callback invocations on I/O threads. The row
//! queue turns those pushes into pull-based iteration on the caller's
//! thread.
//!
//! # Protocol
//!
//! The producer pushes zero or more rows, then the terminal marker
//! [`Streamed::End`], then exactly one [`Streamed::Final`] carrying the
//! final metadata or a terminal error. After `Final` the queue rejects every
//! push with [`Error::StreamClosed`]. The marker is its own enum variant, so
//! it can never be mistaken for a row.
//!
//! Delivery order is push order. The queue is unbounded unless a capacity is
//! given; a bounded queue blocks the producer while the consumer catches up
//! but still delivers in push order. The marker and final entry are never
//! subject to the bound.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::error::{Error, Result};

/// One entry of the streaming protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Streamed<T, M> {
    /// A result row
    Row(T),
    /// No more rows; the final entry follows
    End,
    /// Final metadata or terminal error
    Final(Result<M>),
}

struct State<T, M> {
    entries: VecDeque<Streamed<T, M>>,
    rows_queued: usize,
    sealed: bool,
    consumer_gone: bool,
}

struct Inner<T, M> {
    state: Mutex<State<T, M>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: Option<usize>,
    senders: AtomicUsize,
}

impl<T, M> Inner<T, M> {
    fn seal(&self, last: Result<M>) -> Result<()> {
        let mut state = self.state.lock();
        if state.sealed {
            return Err(Error::StreamClosed);
        }
        state.sealed = true;
        if !state.consumer_gone {
            state.entries.push_back(Streamed::End);
            state.entries.push_back(Streamed::Final(last));
        }
        self.not_empty.notify_all();
        self.not_full.notify_all();
        Ok(())
    }
}

trait Abort: Send + Sync {
    fn abort(&self, error: Error) -> bool;
}

impl<T: Send, M: Send> Abort for Inner<T, M> {
    fn abort(&self, error: Error) -> bool {
        self.seal(Err(error)).is_ok()
    }
}

/// Type-erased handle that seals a stream from outside its producer.
///
/// Holds no strong reference; aborting a stream whose halves are all gone
/// does nothing.
#[derive(Clone)]
pub struct AbortHandle {
    inner: Weak<dyn Abort>,
}

impl AbortHandle {
    /// Seal the stream with `error`, waking a producer blocked on a full
    /// queue. Returns `false` when the stream was already finished.
    pub fn abort(&self, error: Error) -> bool {
        match self.inner.upgrade() {
            Some(inner) => inner.abort(error),
            None => false,
        }
    }

    /// Whether the queue still exists.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl std::fmt::Debug for AbortHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortHandle")
            .field("live", &self.is_live())
            .finish()
    }
}

/// Create a row queue, returning its producer and consumer halves.
///
/// `capacity` bounds the number of undelivered rows; `None` is unbounded.
pub fn row_queue<T, M>(capacity: Option<usize>) -> (RowSender<T, M>, RowStream<T, M>) {
    let inner = Arc::new(Inner {
        state: Mutex::new(State {
            entries: VecDeque::new(),
            rows_queued: 0,
            sealed: false,
            consumer_gone: false,
        }),
        not_empty: Condvar::new(),
        not_full: Condvar::new(),
        capacity: capacity.map(|c| c.max(1)),
        senders: AtomicUsize::new(1),
    });
    (
        RowSender {
            inner: Arc::clone(&inner),
        },
        RowStream {
            inner,
            finished: false,
            metadata: None,
        },
    )
}

/// Producer half of a row queue.
///
/// Clones share the same queue. When the last clone is dropped before the
/// stream was finished, the stream is sealed with a cancellation error.
pub struct RowSender<T, M> {
    inner: Arc<Inner<T, M>>,
}

impl<T, M> RowSender<T, M> {
    /// Push a row.
    ///
    /// Blocks while a bounded queue is full. Fails with
    /// [`Error::StreamClosed`] after the stream was finished or the consumer
    /// went away.
    pub fn push(&self, row: T) -> Result<()> {
        let mut state = self.inner.state.lock();
        if let Some(capacity) = self.inner.capacity {
            while state.rows_queued >= capacity && !state.consumer_gone && !state.sealed {
                self.inner.not_full.wait(&mut state);
            }
        }
        if state.sealed || state.consumer_gone {
            return Err(Error::StreamClosed);
        }
        state.entries.push_back(Streamed::Row(row));
        state.rows_queued += 1;
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Finish the stream with its final metadata.
    pub fn finish(&self, metadata: M) -> Result<()> {
        self.inner.seal(Ok(metadata))
    }

    /// Finish the stream with a terminal error.
    pub fn fail(&self, error: Error) -> Result<()> {
        self.inner.seal(Err(error))
    }

    /// Whether the stream no longer accepts rows.
    pub fn is_closed(&self) -> bool {
        let state = self.inner.state.lock();
        state.sealed || state.consumer_gone
    }

    /// Handle that can seal this stream without being a producer.
    pub fn abort_handle(&self) -> AbortHandle
    where
        T: Send + 'static,
        M: Send + 'static,
    {
        let inner: Arc<dyn Abort> = self.inner.clone();
        AbortHandle {
            inner: Arc::downgrade(&inner),
        }
    }
}

impl<T, M> Clone for RowSender<T, M> {
    fn clone(&self) -> Self {
        self.inner.senders.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T, M> Drop for RowSender<T, M> {
    fn drop(&mut self) {
        if self.inner.senders.fetch_sub(1, Ordering::AcqRel) == 1 {
            // Last producer gone; a stream that was already finished ignores this.
            let _ = self.inner.seal(Err(Error::cancelled(
                "row producer dropped before the stream finished",
            )));
        }
    }
}

/// Consumer half of a row queue.
///
/// Iterating yields `Ok(row)` for every row, then a single `Err` if the
/// stream ended with an error, then `None`. Final metadata is available from
/// [`metadata`](RowStream::metadata) once iteration is over.
pub struct RowStream<T, M> {
    inner: Arc<Inner<T, M>>,
    finished: bool,
    metadata: Option<M>,
}

impl<T, M> RowStream<T, M> {
    /// Pop the next protocol entry, blocking until one is available.
    ///
    /// After the `Final` entry has been returned, further calls return
    /// `Final(Err(StreamClosed))`.
    pub fn pop_blocking(&mut self) -> Streamed<T, M> {
        if self.finished {
            return Streamed::Final(Err(Error::StreamClosed));
        }
        let entry = {
            let mut state = self.inner.state.lock();
            loop {
                if let Some(entry) = state.entries.pop_front() {
                    if matches!(entry, Streamed::Row(_)) {
                        state.rows_queued -= 1;
                        self.inner.not_full.notify_one();
                    }
                    break entry;
                }
                self.inner.not_empty.wait(&mut state);
            }
        };
        if matches!(entry, Streamed::Final(_)) {
            self.finished = true;
        }
        entry
    }

    /// Pop the next row, releasing `guard` while blocked.
    pub fn next_unlocked<S>(&mut self, guard: &mut MutexGuard<'_, S>) -> Option<Result<T>> {
        MutexGuard::unlocked(guard, || self.next())
    }

    /// Final metadata, available once iteration has completed successfully.
    pub fn metadata(&self) -> Option<&M> {
        self.metadata.as_ref()
    }

    /// Whether the final entry has been consumed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Discard remaining rows and return the final result.
    pub fn finish(mut self) -> Result<M> {
        loop {
            match self.next() {
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        self.metadata.take().ok_or(Error::StreamClosed)
    }

    /// Collect every row and the final metadata.
    pub fn collect_all(mut self) -> Result<(Vec<T>, M)> {
        let mut rows = Vec::new();
        for row in self.by_ref() {
            rows.push(row?);
        }
        let metadata = self.metadata.take().ok_or(Error::StreamClosed)?;
        Ok((rows, metadata))
    }
}

impl<T, M> Iterator for RowStream<T, M> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            match self.pop_blocking() {
                Streamed::Row(row) => return Some(Ok(row)),
                Streamed::End => continue,
                Streamed::Final(Ok(metadata)) => {
                    self.metadata = Some(metadata);
                    return None;
                }
                Streamed::Final(Err(error)) => return Some(Err(error)),
            }
        }
    }
}

impl<T, M> Drop for RowStream<T, M> {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.consumer_gone = true;
        state.entries.clear();
        state.rows_queued = 0;
        self.inner.not_full.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_protocol_order() {
        let (tx, mut rx) = row_queue::<u32, &str>(None);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.finish("meta").unwrap();

        assert_eq!(rx.pop_blocking(), Streamed::Row(1));
        assert_eq!(rx.pop_blocking(), Streamed::Row(2));
        assert_eq!(rx.pop_blocking(), Streamed::End);
        assert_eq!(rx.pop_blocking(), Streamed::Final(Ok("meta")));
        assert!(rx.is_finished());
    }

    #[test]
    fn test_push_after_finish_rejected() {
        let (tx, _rx) = row_queue::<u32, ()>(None);
        tx.finish(()).unwrap();
        assert_eq!(tx.push(3), Err(Error::StreamClosed));
        assert_eq!(tx.finish(()), Err(Error::StreamClosed));
        assert!(tx.is_closed());
    }

    #[test]
    fn test_iterator_yields_rows_then_metadata() {
        let (tx, mut rx) = row_queue::<u32, u64>(None);
        let producer = thread::spawn(move || {
            for i in 0..10 {
                tx.push(i).unwrap();
            }
            tx.finish(10).unwrap();
        });

        let rows: Vec<u32> = rx.by_ref().map(|r| r.unwrap()).collect();
        assert_eq!(rows, (0..10).collect::<Vec<_>>());
        assert_eq!(rx.metadata(), Some(&10));
        assert!(rx.next().is_none());
        producer.join().unwrap();
    }

    #[test]
    fn test_terminal_error_after_rows() {
        let (tx, rx) = row_queue::<u32, ()>(None);
        tx.push(1).unwrap();
        tx.fail(Error::internal("boom")).unwrap();

        let items: Vec<Result<u32>> = rx.collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(1));
        assert_eq!(items[1], Err(Error::internal("boom")));
    }

    #[test]
    fn test_dropped_sender_cancels_stream() {
        let (tx, rx) = row_queue::<u32, ()>(None);
        let clone = tx.clone();
        tx.push(5).unwrap();
        drop(tx);
        // One clone still alive, stream stays open
        clone.push(6).unwrap();
        drop(clone);

        let items: Vec<Result<u32>> = rx.collect();
        assert_eq!(items[0], Ok(5));
        assert_eq!(items[1], Ok(6));
        assert!(items[2].as_ref().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_bounded_queue_preserves_order_with_slow_consumer() {
        let (tx, rx) = row_queue::<u32, ()>(Some(2));
        let producer = thread::spawn(move || {
            for i in 0..50 {
                tx.push(i).unwrap();
            }
            tx.finish(()).unwrap();
        });

        let mut seen = Vec::new();
        for row in rx {
            seen.push(row.unwrap());
            if seen.len() % 10 == 0 {
                thread::sleep(Duration::from_millis(2));
            }
        }
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
        producer.join().unwrap();
    }

    #[test]
    fn test_dropped_consumer_unblocks_bounded_producer() {
        let (tx, rx) = row_queue::<u32, ()>(Some(1));
        tx.push(0).unwrap();
        let producer = thread::spawn(move || tx.push(1));
        thread::sleep(Duration::from_millis(20));
        drop(rx);
        assert_eq!(producer.join().unwrap(), Err(Error::StreamClosed));
    }

    #[test]
    fn test_abort_unblocks_bounded_producer() {
        let (tx, rx) = row_queue::<u32, ()>(Some(1));
        let handle = tx.abort_handle();
        tx.push(0).unwrap();
        let producer = thread::spawn(move || tx.push(1));
        thread::sleep(Duration::from_millis(20));

        assert!(handle.abort(Error::cancelled("connection closed")));
        assert_eq!(producer.join().unwrap(), Err(Error::StreamClosed));
        assert!(!handle.abort(Error::cancelled("again")));

        let items: Vec<Result<u32>> = rx.collect();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(0));
        assert!(items[1].as_ref().unwrap_err().is_cancelled());
        assert!(!handle.is_live());
    }

    #[test]
    fn test_finish_discards_remaining_rows() {
        let (tx, rx) = row_queue::<u32, &str>(None);
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        tx.finish("done").unwrap();
        assert_eq!(rx.finish().unwrap(), "done");
    }

    #[test]
    fn test_collect_all() {
        let (tx, rx) = row_queue::<u32, &str>(None);
        tx.push(1).unwrap();
        tx.finish("m").unwrap();
        let (rows, meta) = rx.collect_all().unwrap();
        assert_eq!(rows, vec![1]);
        assert_eq!(meta, "m");
    }
}
