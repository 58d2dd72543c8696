//! Callback dispatcher.
//!
//! User callbacks never run on I/O threads. Completions destined for a
//! callback are posted to a single dispatcher thread which runs them one at a
//! time, so no two callbacks ever run concurrently and host state touched
//! only from callbacks needs no further synchronization.
//!
//! A callback must not wait on the `Pending` of another callback-mode
//! operation: that completion would need this same thread.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{error, warn};

use tether_core::{Completer, Error, Result};
use tether_engine::{panic_message, IoContext, IoThreadPool, PostError};

/// Name of the dispatcher thread.
pub const DISPATCHER_THREAD: &str = "tether-callback";

/// Handle to the callback dispatcher. Clones share the same thread.
#[derive(Clone)]
pub struct CallbackDispatcher {
    context: IoContext,
    thread: Arc<IoThreadPool>,
}

impl CallbackDispatcher {
    /// Spawn the dispatcher thread.
    pub fn start() -> Result<Self> {
        let context = IoContext::new();
        let thread = IoThreadPool::start(&context, 1, DISPATCHER_THREAD)
            .map_err(|e| Error::internal(e.message))?;
        Ok(Self {
            context,
            thread: Arc::new(thread),
        })
    }

    /// Run `job` on the dispatcher thread, then complete `done`.
    ///
    /// `done` is fulfilled after the job returned, or failed with
    /// [`Error::Callback`] if it panicked.
    pub fn invoke(&self, job: impl FnOnce() + Send + 'static, done: Completer<()>) {
        let task = move || match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => done.fulfill(()),
            Err(panic) => {
                let reason = panic_message(&*panic);
                error!(reason = %reason, "user callback panicked");
                done.fail(Error::Callback { reason });
            }
        };
        if let Err(PostError(task)) = self.context.post(task) {
            warn!("callback dispatcher is stopped; dropping callback");
            // Dropping the task drops `done`, which fails the pending handle
            drop(task);
        }
    }

    /// Whether the current thread is the dispatcher thread.
    pub fn is_dispatcher_thread(&self) -> bool {
        self.thread.is_pool_thread()
    }

    /// Run every queued callback, then stop the thread and join it.
    pub fn shutdown(&self) {
        self.context.shutdown();
        for name in self.thread.join() {
            error!(thread = %name, "callback dispatcher thread panicked");
        }
    }
}

impl std::fmt::Debug for CallbackDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackDispatcher")
            .field("context", &self.context)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tether_core::completion_barrier;

    #[test]
    fn test_callbacks_run_in_order_on_one_thread() {
        let dispatcher = CallbackDispatcher::start().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut waiters = Vec::new();
        for i in 0..10 {
            let (done, waiter) = completion_barrier();
            let seen = Arc::clone(&seen);
            dispatcher.invoke(
                move || {
                    let name = std::thread::current().name().map(str::to_string);
                    seen.lock().push((i, name));
                },
                done,
            );
            waiters.push(waiter);
        }
        for waiter in waiters {
            waiter.wait().unwrap();
        }
        let seen = seen.lock();
        assert_eq!(seen.len(), 10);
        for (i, (n, name)) in seen.iter().enumerate() {
            assert_eq!(*n, i);
            assert_eq!(name.as_deref(), Some("tether-callback-0"));
        }
        drop(seen);
        dispatcher.shutdown();
    }

    #[test]
    fn test_panicking_callback_is_reported() {
        let dispatcher = CallbackDispatcher::start().unwrap();
        let (done, waiter) = completion_barrier();
        dispatcher.invoke(|| panic!("callback blew up"), done);
        match waiter.wait() {
            Err(Error::Callback { reason }) => assert_eq!(reason, "callback blew up"),
            other => panic!("expected callback error, got {:?}", other),
        }

        // The dispatcher survives the panic
        let (done, waiter) = completion_barrier();
        dispatcher.invoke(|| {}, done);
        assert!(waiter.wait().is_ok());
        dispatcher.shutdown();
    }

    #[test]
    fn test_invoke_after_shutdown_fails_pending() {
        let dispatcher = CallbackDispatcher::start().unwrap();
        dispatcher.shutdown();
        let (done, waiter) = completion_barrier();
        dispatcher.invoke(|| {}, done);
        assert!(waiter.wait().unwrap_err().is_cancelled());
    }
}
