//! Dispatch of single operations, batches and streams.
//!
//! An entry point describes its operation as a [`Call`]: how to submit it to
//! the cluster and how to build the host-visible value from the engine's
//! response. The connection then picks a route:
//! - [`blocking`](Connection::blocking) waits on a completion barrier
//! - [`with_callbacks`](Connection::with_callbacks) hands the outcome to the
//!   callback dispatcher and returns a [`Pending`]
//! - [`multi`](Connection::multi) fans calls out and joins them per key,
//!   optionally releasing the host's lock while joining
//!
//! Streams bypass `Call` and feed a row queue directly
//! ([`stream`](Connection::stream)).

use std::ops::ControlFlow;
use std::sync::Arc;

use parking_lot::MutexGuard;
use tracing::trace;

use crate::callback::{CallbackContext, Callbacks, Pending, Route};
use crate::codec::Transcoder;
use crate::connection::{Connection, Runtime};
use crate::convert::build_error;
use tether_core::{completion_barrier, row_queue, MultiOp, MultiResult, Result, RowStream};
use tether_engine::{Cluster, EngineResult, Handler, RowHandler, StreamMeta, StreamRequest, StreamRow};

type Submit<R> = Box<dyn FnOnce(&dyn Cluster, Handler<R>)>;
type Build<R, T> = Box<dyn FnOnce(R, &dyn Transcoder) -> Result<T> + Send>;

/// One engine request plus the builder for its result.
pub(crate) struct Call<R, T> {
    name: &'static str,
    key: Option<String>,
    submit: Submit<R>,
    build: Build<R, T>,
    transcoder: Option<Arc<dyn Transcoder>>,
}

impl<R: Send + 'static, T: Send + 'static> Call<R, T> {
    pub(crate) fn new(
        name: &'static str,
        submit: impl FnOnce(&dyn Cluster, Handler<R>) + 'static,
        build: impl FnOnce(R, &dyn Transcoder) -> Result<T> + Send + 'static,
    ) -> Self {
        Self {
            name,
            key: None,
            submit: Box::new(submit),
            build: Box::new(build),
            transcoder: None,
        }
    }

    /// Record the document key on the request span.
    pub(crate) fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Build with `transcoder` instead of the connection's.
    pub(crate) fn transcoder(mut self, transcoder: Option<Arc<dyn Transcoder>>) -> Self {
        self.transcoder = transcoder;
        self
    }
}

impl Connection {
    fn dispatch<R, T>(&self, runtime: &Runtime, call: Call<R, T>, route: Route<T>)
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        let Call {
            name,
            key,
            submit,
            build,
            transcoder,
        } = call;
        let transcoder = transcoder.unwrap_or_else(|| Arc::clone(&self.inner.transcoder));
        let mut ctx = CallbackContext::new(route, transcoder, self.inner.tracer.start(name));
        if let (Some(span), Some(key)) = (ctx.span_mut(), key.as_ref()) {
            span.set_attribute("key", key.clone());
        }
        trace!(operation = name, key = ?key, "dispatching");
        submit(
            &*runtime.cluster,
            Box::new(move |result: EngineResult<R>| {
                let outcome = match result {
                    Ok(response) => build(response, ctx.transcoder()),
                    Err(error) => Err(build_error(error)),
                };
                ctx.complete(outcome);
            }),
        );
    }

    /// Dispatch `call` and block until it completes.
    pub(crate) fn blocking<R, T>(&self, call: Call<R, T>) -> Result<T>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        let (completer, waiter) = completion_barrier();
        match self.runtime() {
            Ok(runtime) => self.dispatch(&runtime, call, Route::Blocking(completer)),
            Err(error) => completer.fail(error),
        }
        waiter.wait()
    }

    /// Dispatch `call`; `callbacks` run on the callback dispatcher.
    pub(crate) fn with_callbacks<R, T>(
        &self,
        call: Call<R, T>,
        callbacks: Callbacks<T>,
    ) -> Result<Pending>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.runtime()?;
        let (done, waiter) = completion_barrier();
        let route = Route::Callback {
            callbacks,
            done,
            dispatcher: runtime.dispatcher.clone(),
        };
        self.dispatch(&runtime, call, route);
        Ok(Pending::new(waiter))
    }

    /// Dispatch every call at once and wait for all of them.
    pub(crate) fn multi<R, T>(
        &self,
        calls: Vec<(String, Result<Call<R, T>>)>,
    ) -> Result<MultiResult<T>>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        Ok(self.submit_multi(calls)?.join())
    }

    /// [`multi`](Connection::multi), releasing `guard` while waiting.
    pub(crate) fn multi_unlocked<R, T, S>(
        &self,
        calls: Vec<(String, Result<Call<R, T>>)>,
        guard: &mut MutexGuard<'_, S>,
    ) -> Result<MultiResult<T>>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        Ok(self.submit_multi(calls)?.join_unlocked(guard))
    }

    /// Dispatch every call at once.
    ///
    /// A key whose call could not be built gets that error as its outcome
    /// without anything being dispatched for it.
    fn submit_multi<R, T>(&self, calls: Vec<(String, Result<Call<R, T>>)>) -> Result<MultiOp<T>>
    where
        R: Send + 'static,
        T: Send + 'static,
    {
        let runtime = self.runtime()?;
        let mut op = MultiOp::with_capacity(calls.len());
        for (key, call) in calls {
            let (completer, waiter) = completion_barrier();
            match call {
                Ok(call) => self.dispatch(&runtime, call, Route::Blocking(completer)),
                Err(error) => completer.fail(error),
            }
            op.push(key, waiter);
        }
        trace!(operations = op.len(), "joining batch");
        Ok(op)
    }

    /// Start a streaming request whose rows are read from the returned
    /// stream.
    ///
    /// A row that cannot be converted fails the stream with that error and
    /// stops the request.
    pub(crate) fn stream<T, M>(
        &self,
        request: StreamRequest,
        mut map_row: impl FnMut(StreamRow) -> Result<T> + Send + 'static,
        map_meta: impl FnOnce(StreamMeta) -> Result<M> + Send + 'static,
    ) -> Result<RowStream<T, M>>
    where
        T: Send + 'static,
        M: Send + 'static,
    {
        let runtime = self.runtime()?;
        let (sender, stream) = row_queue(self.options().row_queue_capacity);
        runtime.register_stream(sender.abort_handle());
        let span = self.inner.tracer.start(request.kind.name());
        trace!(operation = request.kind.name(), "dispatching stream");

        let rows = sender.clone();
        let on_row: RowHandler = Box::new(move |row| {
            let pushed = map_row(row).and_then(|row| rows.push(row));
            match pushed {
                Ok(()) => ControlFlow::Continue(()),
                Err(error) => {
                    // Consumer gone, or a row that cannot be built
                    if rows.fail(error).is_err() {
                        trace!("row stream already closed");
                    }
                    ControlFlow::Break(())
                }
            }
        });
        let on_complete: Handler<StreamMeta> = Box::new(move |result| {
            let outcome = result.map_err(build_error).and_then(map_meta);
            span.end(outcome.as_ref().err());
            let sealed = match outcome {
                Ok(meta) => sender.finish(meta),
                Err(error) => sender.fail(error),
            };
            if sealed.is_err() {
                trace!("row stream already closed");
            }
        });
        runtime.cluster.execute_streaming(request, on_row, on_complete);
        Ok(stream)
    }
}
