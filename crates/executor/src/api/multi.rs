//! Batch operations.
//!
//! A batch dispatches one operation per key at once and waits for all of
//! them. The result has one entry per key in submission order; one key
//! failing never affects the others. An argument error for a key (for
//! example an empty key) becomes that key's outcome.

use std::time::Duration;

use parking_lot::MutexGuard;

use crate::api::kv::StoreMode;
use crate::codec::Content;
use crate::connection::Connection;
use crate::options::{CasOptions, ReadOptions, StoreOptions, TimeoutOptions};
use crate::results::{ExistsResult, GetResult, MutationResult};
use tether_core::{MultiResult, Result};

impl Connection {
    /// Read several documents.
    pub fn get_multi<I, K>(&self, keys: I, options: ReadOptions) -> Result<MultiResult<GetResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let calls = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.get_call(key, options.clone()))
            })
            .collect();
        self.multi(calls)
    }

    /// [`get_multi`](Connection::get_multi), releasing `guard` while the
    /// reads are outstanding.
    pub fn get_multi_unlocked<I, K, S>(
        &self,
        keys: I,
        options: ReadOptions,
        guard: &mut MutexGuard<'_, S>,
    ) -> Result<MultiResult<GetResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let calls = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.get_call(key, options.clone()))
            })
            .collect();
        self.multi_unlocked(calls, guard)
    }

    /// Create or overwrite several documents.
    pub fn upsert_multi<I, K, C>(
        &self,
        documents: I,
        options: StoreOptions,
    ) -> Result<MultiResult<MutationResult>>
    where
        I: IntoIterator<Item = (K, C)>,
        K: AsRef<str>,
        C: Into<Content>,
    {
        let calls = documents
            .into_iter()
            .map(|(key, content)| {
                let key = key.as_ref();
                let call = self.store_call(StoreMode::Upsert, key, &content.into(), options.clone());
                (key.to_string(), call)
            })
            .collect();
        self.multi(calls)
    }

    /// Remove several documents.
    pub fn remove_multi<I, K>(&self, keys: I, options: TimeoutOptions) -> Result<MultiResult<MutationResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let options = CasOptions {
            timeout: options.timeout,
            cas: None,
        };
        let calls = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.remove_call(key, options))
            })
            .collect();
        self.multi(calls)
    }

    /// Reset the expiry of several documents.
    pub fn touch_multi<I, K>(
        &self,
        keys: I,
        expiry: Duration,
        options: TimeoutOptions,
    ) -> Result<MultiResult<MutationResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let calls = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.touch_call(key, expiry, options))
            })
            .collect();
        self.multi(calls)
    }

    /// Check the existence of several documents.
    pub fn exists_multi<I, K>(&self, keys: I, options: TimeoutOptions) -> Result<MultiResult<ExistsResult>>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let calls = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                (key.to_string(), self.exists_call(key, options))
            })
            .collect();
        self.multi(calls)
    }
}
