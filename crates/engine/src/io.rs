//! Execution context and I/O thread pool.
//!
//! [`IoContext`] is a reactor-style task queue shared by a fixed pool of I/O
//! threads. Every completion handler the engine invokes runs as a task on
//! this context. [`IoThreadPool`] owns the threads driving it.
//!
//! The context supports two ways of stopping:
//! - [`IoContext::stop`] abandons queued tasks; running tasks finish, queued
//!   ones are dropped without running.
//! - [`IoContext::shutdown`] lets the loops drain every queued task first.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error};

use crate::error::{EngineError, EngineResult};
use tether_core::ErrorCode;

type Task = Box<dyn FnOnce() + Send>;

/// Error returned when posting to a stopped context, carrying the task back.
pub struct PostError<F>(pub F);

impl<F> std::fmt::Debug for PostError<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PostError(..)")
    }
}

impl<F> std::fmt::Display for PostError<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "execution context is stopped")
    }
}

impl<F> std::error::Error for PostError<F> {}

/// Context metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextStats {
    /// Number of tasks waiting in the queue.
    pub queue_depth: usize,
    /// Number of tasks currently running.
    pub active_tasks: usize,
    /// Total number of tasks run since creation.
    pub tasks_completed: u64,
}

struct ContextInner {
    queue: Mutex<VecDeque<Task>>,
    work_ready: Condvar,
    stopped: AtomicBool,
    draining: AtomicBool,
    active_tasks: AtomicUsize,
    tasks_completed: AtomicU64,
}

/// Shared execution context.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct IoContext {
    inner: Arc<ContextInner>,
}

impl IoContext {
    /// Create an idle context with no threads attached.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                queue: Mutex::new(VecDeque::new()),
                work_ready: Condvar::new(),
                stopped: AtomicBool::new(false),
                draining: AtomicBool::new(false),
                active_tasks: AtomicUsize::new(0),
                tasks_completed: AtomicU64::new(0),
            }),
        }
    }

    /// Queue a task to run on one of the threads driving this context.
    ///
    /// Tasks run in FIFO order per context; with more than one thread,
    /// consecutive tasks may run concurrently.
    ///
    /// A stopped or draining context rejects the task and hands it back.
    pub fn post<F>(&self, task: F) -> Result<(), PostError<F>>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_stopped() || self.inner.draining.load(Ordering::Acquire) {
            return Err(PostError(task));
        }
        {
            let mut queue = self.inner.queue.lock();
            queue.push_back(Box::new(task));
        }
        self.inner.work_ready.notify_one();
        Ok(())
    }

    /// Run the event loop on the current thread until the context stops.
    ///
    /// A panicking task is logged and does not end the loop.
    pub fn run(&self) {
        loop {
            let task = {
                let mut queue = self.inner.queue.lock();
                loop {
                    if self.inner.stopped.load(Ordering::Acquire) {
                        return;
                    }
                    if let Some(task) = queue.pop_front() {
                        self.inner.active_tasks.fetch_add(1, Ordering::AcqRel);
                        break task;
                    }
                    if self.inner.draining.load(Ordering::Acquire) {
                        return;
                    }
                    self.inner.work_ready.wait(&mut queue);
                }
            };

            if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                error!("I/O task panicked: {}", panic_message(&*panic));
            }
            self.inner.active_tasks.fetch_sub(1, Ordering::AcqRel);
            self.inner.tasks_completed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Stop the context, abandoning queued tasks.
    ///
    /// Loops return after their current task. Abandoned tasks are dropped,
    /// which drops whatever completion handlers they captured.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::Release);
        let abandoned: Vec<Task> = {
            let mut queue = self.inner.queue.lock();
            self.inner.work_ready.notify_all();
            queue.drain(..).collect()
        };
        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "execution context stopped with queued tasks");
        }
        drop(abandoned);
    }

    /// Stop accepting tasks and let the loops exit once the queue is empty.
    pub fn shutdown(&self) {
        self.inner.draining.store(true, Ordering::Release);
        // Lock before notifying so a loop between its checks and wait() cannot miss it
        let _queue = self.inner.queue.lock();
        self.inner.work_ready.notify_all();
    }

    /// Whether [`stop`](IoContext::stop) has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    /// Return a snapshot of context metrics.
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            queue_depth: self.inner.queue.lock().len(),
            active_tasks: self.inner.active_tasks.load(Ordering::Relaxed),
            tasks_completed: self.inner.tasks_completed.load(Ordering::Relaxed),
        }
    }
}

impl Default for IoContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for IoContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoContext")
            .field("stopped", &self.is_stopped())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Fixed-size pool of threads driving one [`IoContext`].
pub struct IoThreadPool {
    threads: Mutex<Vec<(String, JoinHandle<()>)>>,
    size: usize,
}

impl IoThreadPool {
    /// Spawn `size` threads named `{name}-0`, `{name}-1`, ... each running
    /// `context.run()`.
    ///
    /// A panic escaping the loop is logged and re-raised, so it surfaces in
    /// [`join`](IoThreadPool::join) instead of ending the thread silently.
    pub fn start(context: &IoContext, size: usize, name: &str) -> EngineResult<Self> {
        let mut threads = Vec::with_capacity(size);
        for i in 0..size {
            let thread_name = format!("{}-{}", name, i);
            let ctx = context.clone();
            let label = thread_name.clone();
            let spawned = std::thread::Builder::new()
                .name(thread_name.clone())
                .spawn(move || {
                    debug!(thread = %label, "I/O thread started");
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| ctx.run())) {
                        error!(
                            thread = %label,
                            "I/O event loop terminated: {}",
                            panic_message(&*panic)
                        );
                        resume_unwind(panic);
                    }
                    debug!(thread = %label, "I/O thread exiting");
                });
            match spawned {
                Ok(handle) => threads.push((thread_name, handle)),
                Err(e) => {
                    // Unwind the threads already started before reporting
                    context.stop();
                    for (_, handle) in threads {
                        let _ = handle.join();
                    }
                    return Err(EngineError::new(
                        ErrorCode::InternalServerFailure,
                        format!("failed to spawn I/O thread {}: {}", thread_name, e),
                    ));
                }
            }
        }
        Ok(Self {
            threads: Mutex::new(threads),
            size,
        })
    }

    /// Number of threads the pool was started with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether the current thread belongs to this pool.
    pub fn is_pool_thread(&self) -> bool {
        let current = std::thread::current().id();
        self.threads
            .lock()
            .iter()
            .any(|(_, handle)| handle.thread().id() == current)
    }

    /// Join every thread, returning the names of threads that panicked.
    ///
    /// The context must have been stopped or shut down first. Joining twice
    /// is a no-op.
    pub fn join(&self) -> Vec<String> {
        let threads: Vec<(String, JoinHandle<()>)> = self.threads.lock().drain(..).collect();
        threads
            .into_iter()
            .filter_map(|(name, handle)| handle.join().err().map(|_| name))
            .collect()
    }
}

impl std::fmt::Debug for IoThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IoThreadPool").field("size", &self.size).finish()
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "(non-string panic)".to_string()
    }
}
