//! Completion routing.
//!
//! Every operation carries a [`CallbackContext`] into its engine completion
//! handler. The context owns everything the completion needs (the blocking
//! barrier or the user's callbacks, the transcoder, the tracing span) and is
//! consumed by [`CallbackContext::complete`]. Everything it owns is released
//! before the caller observes completion.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::MutexGuard;
use tracing::error;

use crate::codec::Transcoder;
use crate::host::CallbackDispatcher;
use crate::tracer::RequestSpan;
use tether_core::{Completer, Error, Result, Waiter};
use tether_engine::panic_message;

type SuccessFn<T> = Box<dyn FnOnce(T) + Send + 'static>;
type ErrorFn = Box<dyn FnOnce(Error) + Send + 'static>;

/// Success callback plus optional failure callback.
///
/// Exactly one of them runs, on the connection's callback dispatcher thread.
/// Without a failure callback the error is reported through the operation's
/// [`Pending`] handle instead.
pub struct Callbacks<T> {
    on_success: SuccessFn<T>,
    on_error: Option<ErrorFn>,
}

impl<T> Callbacks<T> {
    /// Callbacks with only a success handler.
    pub fn new(on_success: impl FnOnce(T) + Send + 'static) -> Self {
        Self {
            on_success: Box::new(on_success),
            on_error: None,
        }
    }

    /// Add a failure handler.
    pub fn on_error(mut self, on_error: impl FnOnce(Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(on_error));
        self
    }

    /// Run the matching callback on the current thread, then complete
    /// `done`.
    ///
    /// Used for lifecycle operations, whose callbacks cannot run on the
    /// dispatcher they tear down.
    pub(crate) fn run_here(self, result: Result<T>, done: Completer<()>) {
        let Callbacks {
            on_success,
            on_error,
        } = self;
        let job: Box<dyn FnOnce()> = match (result, on_error) {
            (Ok(value), _) => Box::new(move || on_success(value)),
            (Err(error), Some(on_error)) => {
                drop(on_success);
                Box::new(move || on_error(error))
            }
            (Err(error), None) => {
                drop(on_success);
                done.fail(error);
                return;
            }
        };
        match catch_unwind(AssertUnwindSafe(job)) {
            Ok(()) => done.fulfill(()),
            Err(panic) => {
                let reason = panic_message(&*panic);
                error!(reason = %reason, "lifecycle callback panicked");
                done.fail(Error::Callback { reason });
            }
        }
    }
}

impl<T> std::fmt::Debug for Callbacks<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

pub(crate) enum Route<T> {
    Blocking(Completer<T>),
    Callback {
        callbacks: Callbacks<T>,
        done: Completer<()>,
        dispatcher: CallbackDispatcher,
    },
}

/// Per-operation completion state.
pub(crate) struct CallbackContext<T> {
    route: Route<T>,
    transcoder: Arc<dyn Transcoder>,
    span: Option<Box<dyn RequestSpan>>,
}

impl<T: Send + 'static> CallbackContext<T> {
    pub(crate) fn new(
        route: Route<T>,
        transcoder: Arc<dyn Transcoder>,
        span: Box<dyn RequestSpan>,
    ) -> Self {
        Self {
            route,
            transcoder,
            span: Some(span),
        }
    }

    pub(crate) fn transcoder(&self) -> &dyn Transcoder {
        &*self.transcoder
    }

    pub(crate) fn span_mut(&mut self) -> Option<&mut Box<dyn RequestSpan>> {
        self.span.as_mut()
    }

    /// Deliver the outcome along the route.
    ///
    /// The transcoder, the span and the callback that will not run are all
    /// dropped before anything is fulfilled.
    pub(crate) fn complete(self, result: Result<T>) {
        let CallbackContext {
            route,
            transcoder,
            span,
        } = self;
        drop(transcoder);
        if let Some(span) = span {
            span.end(result.as_ref().err());
        }

        match route {
            Route::Blocking(completer) => completer.complete(result),
            Route::Callback {
                callbacks,
                done,
                dispatcher,
            } => {
                let Callbacks {
                    on_success,
                    on_error,
                } = callbacks;
                match result {
                    Ok(value) => {
                        drop(on_error);
                        dispatcher.invoke(move || on_success(value), done);
                    }
                    Err(error) => {
                        drop(on_success);
                        match on_error {
                            Some(on_error) => dispatcher.invoke(move || on_error(error), done),
                            None => done.fail(error),
                        }
                    }
                }
            }
        }
    }
}

/// Completion handle of a callback-mode operation.
///
/// Completes with `Ok(())` once the callback has run, with
/// [`Error::Callback`] if it panicked, or with the operation's error when no
/// failure callback was supplied.
#[must_use = "a Pending reports callback failures only when waited on"]
pub struct Pending {
    waiter: Waiter<()>,
}

impl Pending {
    pub(crate) fn new(waiter: Waiter<()>) -> Self {
        Self { waiter }
    }

    /// Block until the operation and its callback finished.
    pub fn wait(self) -> Result<()> {
        self.waiter.wait()
    }

    /// Block while releasing `guard`, so callbacks that take the same lock
    /// can run.
    pub fn wait_unlocked<S>(self, guard: &mut MutexGuard<'_, S>) -> Result<()> {
        self.waiter.wait_unlocked(guard)
    }

    /// Wait at most `timeout`; on timeout the handle is returned.
    pub fn wait_timeout(self, timeout: Duration) -> std::result::Result<Result<()>, Pending> {
        self.waiter
            .wait_timeout(timeout)
            .map_err(|waiter| Pending { waiter })
    }

    /// Whether the operation and its callback finished.
    pub fn is_complete(&self) -> bool {
        self.waiter.is_ready()
    }
}

impl std::fmt::Debug for Pending {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pending")
            .field("complete", &self.is_complete())
            .finish()
    }
}
