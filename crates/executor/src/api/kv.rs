//! Key-value operations.

use std::time::Duration;

use crate::callback::{Callbacks, Pending};
use crate::codec::Content;
use crate::connection::Connection;
use crate::convert;
use crate::dispatch::Call;
use crate::options::{CasOptions, ReadOptions, StoreOptions, TimeoutOptions};
use crate::results::{ExistsResult, GetResult, MutationResult};
use tether_core::Result;
use tether_engine::{Operation, Response};

/// Which store operation to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreMode {
    Upsert,
    Insert,
    Replace,
}

impl Connection {
    pub(crate) fn get_call(&self, key: &str, options: ReadOptions) -> Result<Call<Response, GetResult>> {
        Ok(self
            .kv_call(key, Operation::Get, options.timeout, convert::get_result)?
            .transcoder(options.transcoder))
    }

    fn get_and_touch_call(
        &self,
        key: &str,
        expiry: Duration,
        options: ReadOptions,
    ) -> Result<Call<Response, GetResult>> {
        Ok(self
            .kv_call(
                key,
                Operation::GetAndTouch { expiry },
                options.timeout,
                convert::get_result,
            )?
            .transcoder(options.transcoder))
    }

    pub(crate) fn exists_call(
        &self,
        key: &str,
        options: TimeoutOptions,
    ) -> Result<Call<Response, ExistsResult>> {
        self.kv_call(key, Operation::Exists, options.timeout, convert::exists_result)
    }

    pub(crate) fn store_call(
        &self,
        mode: StoreMode,
        key: &str,
        content: &Content,
        options: StoreOptions,
    ) -> Result<Call<Response, MutationResult>> {
        let content = self.encode(content, options.transcoder.as_ref())?;
        let expiry = options.expiry;
        let op = match mode {
            StoreMode::Upsert => Operation::Upsert { content, expiry },
            StoreMode::Insert => Operation::Insert { content, expiry },
            StoreMode::Replace => Operation::Replace {
                content,
                expiry,
                cas: options.cas.unwrap_or(0),
            },
        };
        self.kv_call(key, op, options.timeout, convert::mutation_result)
    }

    pub(crate) fn remove_call(
        &self,
        key: &str,
        options: CasOptions,
    ) -> Result<Call<Response, MutationResult>> {
        let op = Operation::Remove {
            cas: options.cas.unwrap_or(0),
        };
        self.kv_call(key, op, options.timeout, convert::mutation_result)
    }

    pub(crate) fn touch_call(
        &self,
        key: &str,
        expiry: Duration,
        options: TimeoutOptions,
    ) -> Result<Call<Response, MutationResult>> {
        self.kv_call(
            key,
            Operation::Touch { expiry },
            options.timeout,
            convert::mutation_result,
        )
    }

    /// Read a document.
    ///
    /// Fails with `DocumentNotFound` when the key does not exist.
    pub fn get(&self, key: &str, options: ReadOptions) -> Result<GetResult> {
        self.blocking(self.get_call(key, options)?)
    }

    /// [`get`](Connection::get) with callbacks.
    pub fn get_with(
        &self,
        key: &str,
        options: ReadOptions,
        callbacks: Callbacks<GetResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.get_call(key, options)?, callbacks)
    }

    /// Read a document and reset its expiry.
    pub fn get_and_touch(&self, key: &str, expiry: Duration, options: ReadOptions) -> Result<GetResult> {
        self.blocking(self.get_and_touch_call(key, expiry, options)?)
    }

    /// [`get_and_touch`](Connection::get_and_touch) with callbacks.
    pub fn get_and_touch_with(
        &self,
        key: &str,
        expiry: Duration,
        options: ReadOptions,
        callbacks: Callbacks<GetResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.get_and_touch_call(key, expiry, options)?, callbacks)
    }

    /// Check whether a document exists. A missing document is not an error.
    pub fn exists(&self, key: &str, options: TimeoutOptions) -> Result<ExistsResult> {
        self.blocking(self.exists_call(key, options)?)
    }

    /// [`exists`](Connection::exists) with callbacks.
    pub fn exists_with(
        &self,
        key: &str,
        options: TimeoutOptions,
        callbacks: Callbacks<ExistsResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.exists_call(key, options)?, callbacks)
    }

    /// Create or overwrite a document.
    pub fn upsert(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
    ) -> Result<MutationResult> {
        self.blocking(self.store_call(StoreMode::Upsert, key, &content.into(), options)?)
    }

    /// [`upsert`](Connection::upsert) with callbacks.
    pub fn upsert_with(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        let call = self.store_call(StoreMode::Upsert, key, &content.into(), options)?;
        self.with_callbacks(call, callbacks)
    }

    /// Create a document, failing with `DocumentExists` if it exists.
    pub fn insert(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
    ) -> Result<MutationResult> {
        self.blocking(self.store_call(StoreMode::Insert, key, &content.into(), options)?)
    }

    /// [`insert`](Connection::insert) with callbacks.
    pub fn insert_with(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        let call = self.store_call(StoreMode::Insert, key, &content.into(), options)?;
        self.with_callbacks(call, callbacks)
    }

    /// Overwrite an existing document, optionally guarded by CAS.
    pub fn replace(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
    ) -> Result<MutationResult> {
        self.blocking(self.store_call(StoreMode::Replace, key, &content.into(), options)?)
    }

    /// [`replace`](Connection::replace) with callbacks.
    pub fn replace_with(
        &self,
        key: &str,
        content: impl Into<Content>,
        options: StoreOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        let call = self.store_call(StoreMode::Replace, key, &content.into(), options)?;
        self.with_callbacks(call, callbacks)
    }

    /// Remove a document, optionally guarded by CAS.
    pub fn remove(&self, key: &str, options: CasOptions) -> Result<MutationResult> {
        self.blocking(self.remove_call(key, options)?)
    }

    /// [`remove`](Connection::remove) with callbacks.
    pub fn remove_with(
        &self,
        key: &str,
        options: CasOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.remove_call(key, options)?, callbacks)
    }

    /// Reset the expiry of a document.
    pub fn touch(&self, key: &str, expiry: Duration, options: TimeoutOptions) -> Result<MutationResult> {
        self.blocking(self.touch_call(key, expiry, options)?)
    }

    /// [`touch`](Connection::touch) with callbacks.
    pub fn touch_with(
        &self,
        key: &str,
        expiry: Duration,
        options: TimeoutOptions,
        callbacks: Callbacks<MutationResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.touch_call(key, expiry, options)?, callbacks)
    }
}
