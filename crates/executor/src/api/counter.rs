//! Binary counter and raw byte operations.

use crate::callback::{Callbacks, Pending};
use crate::connection::Connection;
use crate::convert;
use crate::dispatch::Call;
use crate::options::{CasOptions, CounterOptions};
use crate::results::{CounterResult, MutationResult};
use tether_core::Result;
use tether_engine::{Operation, Response};

impl Connection {
    fn counter_call(
        &self,
        key: &str,
        increment: bool,
        options: CounterOptions,
    ) -> Result<Call<Response, CounterResult>> {
        let CounterOptions {
            timeout,
            delta,
            initial,
            expiry,
        } = options;
        let op = if increment {
            Operation::Increment {
                delta,
                initial,
                expiry,
            }
        } else {
            Operation::Decrement {
                delta,
                initial,
                expiry,
            }
        };
        self.kv_call(key, op, timeout, convert::counter_result)
    }

    fn concat_call(
        &self,
        key: &str,
        bytes: Vec<u8>,
        append: bool,
        options: CasOptions,
    ) -> Result<Call<Response, MutationResult>> {
        let cas = options.cas.unwrap_or(0);
        let op = if append {
            Operation::Append { bytes, cas }
        } else {
            Operation::Prepend { bytes, cas }
        };
        self.kv_call(key, op, options.timeout, convert::mutation_result)
    }

    /// Add `options.delta` to a counter document.
    ///
    /// Without `options.initial`, a missing counter fails with
    /// `DocumentNotFound`. Increments wrap at `u64::MAX`.
    pub fn increment(&self, key: &str, options: CounterOptions) -> Result<CounterResult> {
        self.blocking(self.counter_call(key, true, options)?)
    }

    /// [`increment`](Connection::increment) with callbacks.
    pub fn increment_with(
        &self,
        key: &str,
        options: CounterOptions,
        callbacks: Callbacks<CounterResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.counter_call(key, true, options)?, callbacks)
    }

    /// Subtract `options.delta` from a counter document, stopping at zero.
    pub fn decrement(&self, key: &str, options: CounterOptions) -> Result<CounterResult> {
        self.blocking(self.counter_call(key, false, options)?)
    }

    /// [`decrement`](Connection::decrement) with callbacks.
    pub fn decrement_with(
        &self,
        key: &str,
        options: CounterOptions,
        callbacks: Callbacks<CounterResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.counter_call(key, false, options)?, callbacks)
    }

    /// Append raw bytes to an existing document.
    pub fn append(&self, key: &str, bytes: impl Into<Vec<u8>>, options: CasOptions) -> Result<MutationResult> {
        self.blocking(self.concat_call(key, bytes.into(), true, options)?)
    }

    /// [`append`](Connection::append) with callbacks.
    pub fn append_with(
        &self,
        key: &str,
        bytes: impl Into<Vec<u8>>,
        options: CasOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.concat_call(key, bytes.into(), true, options)?, callbacks)
    }

    /// Prepend raw bytes to an existing document.
    pub fn prepend(&self, key: &str, bytes: impl Into<Vec<u8>>, options: CasOptions) -> Result<MutationResult> {
        self.blocking(self.concat_call(key, bytes.into(), false, options)?)
    }

    /// [`prepend`](Connection::prepend) with callbacks.
    pub fn prepend_with(
        &self,
        key: &str,
        bytes: impl Into<Vec<u8>>,
        options: CasOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.concat_call(key, bytes.into(), false, options)?, callbacks)
    }
}
