//! Subdocument operations.

use serde_json::Value;

use crate::callback::{Callbacks, Pending};
use crate::connection::Connection;
use crate::convert;
use crate::dispatch::Call;
use crate::options::{MutateInOptions, TimeoutOptions};
use crate::results::{LookupInResult, MutateInResult};
use tether_core::{Error, Result};
use tether_engine::{LookupSpec, MutateSpec, Operation, Response};

/// Most instructions one subdocument request may carry.
pub const MAX_SUBDOC_SPECS: usize = 16;

/// Lookup instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupInSpec {
    /// Read the value at a path
    Get(String),
    /// Check whether a path exists
    Exists(String),
    /// Count the elements at a path
    Count(String),
}

impl LookupInSpec {
    /// Read the value at `path`.
    pub fn get(path: impl Into<String>) -> Self {
        LookupInSpec::Get(path.into())
    }

    /// Check whether `path` exists.
    pub fn exists(path: impl Into<String>) -> Self {
        LookupInSpec::Exists(path.into())
    }

    /// Count the elements of the array or object at `path`.
    pub fn count(path: impl Into<String>) -> Self {
        LookupInSpec::Count(path.into())
    }

    fn into_engine(self) -> LookupSpec {
        match self {
            LookupInSpec::Get(path) => LookupSpec::Get { path },
            LookupInSpec::Exists(path) => LookupSpec::Exists { path },
            LookupInSpec::Count(path) => LookupSpec::Count { path },
        }
    }
}

/// Mutation instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum MutateInSpec {
    /// Create or overwrite the value at `path`
    Upsert {
        path: String,
        value: Value,
        create_path: bool,
    },
    /// Create the value at `path`; fails with `PathExists` if present
    Insert {
        path: String,
        value: Value,
        create_path: bool,
    },
    /// Overwrite the value at an existing `path`
    Replace { path: String, value: Value },
    /// Remove the value at `path`
    Remove { path: String },
    /// Append to the array at `path`
    ArrayAppend { path: String, value: Value },
    /// Add `delta` to the number at `path`
    Counter { path: String, delta: i64 },
}

impl MutateInSpec {
    /// Create or overwrite `path`.
    pub fn upsert(path: impl Into<String>, value: Value) -> Self {
        MutateInSpec::Upsert {
            path: path.into(),
            value,
            create_path: false,
        }
    }

    /// Create `path`.
    pub fn insert(path: impl Into<String>, value: Value) -> Self {
        MutateInSpec::Insert {
            path: path.into(),
            value,
            create_path: false,
        }
    }

    /// Overwrite `path`.
    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        MutateInSpec::Replace {
            path: path.into(),
            value,
        }
    }

    /// Remove `path`.
    pub fn remove(path: impl Into<String>) -> Self {
        MutateInSpec::Remove { path: path.into() }
    }

    /// Append `value` to the array at `path`.
    pub fn array_append(path: impl Into<String>, value: Value) -> Self {
        MutateInSpec::ArrayAppend {
            path: path.into(),
            value,
        }
    }

    /// Add `delta` to the number at `path`.
    pub fn counter(path: impl Into<String>, delta: i64) -> Self {
        MutateInSpec::Counter {
            path: path.into(),
            delta,
        }
    }

    /// Create missing parents of the path (upsert and insert only).
    pub fn create_path(mut self) -> Self {
        if let MutateInSpec::Upsert { create_path, .. } | MutateInSpec::Insert { create_path, .. } =
            &mut self
        {
            *create_path = true;
        }
        self
    }

    fn into_engine(self) -> Result<MutateSpec> {
        let encode = |value: &Value| {
            serde_json::to_vec(value).map_err(|e| Error::invalid_argument(e.to_string()))
        };
        Ok(match self {
            MutateInSpec::Upsert {
                path,
                value,
                create_path,
            } => MutateSpec::Upsert {
                value: encode(&value)?,
                path,
                create_path,
            },
            MutateInSpec::Insert {
                path,
                value,
                create_path,
            } => MutateSpec::Insert {
                value: encode(&value)?,
                path,
                create_path,
            },
            MutateInSpec::Replace { path, value } => MutateSpec::Replace {
                value: encode(&value)?,
                path,
            },
            MutateInSpec::Remove { path } => MutateSpec::Remove { path },
            MutateInSpec::ArrayAppend { path, value } => MutateSpec::ArrayAppend {
                value: encode(&value)?,
                path,
            },
            MutateInSpec::Counter { path, delta } => {
                if delta == 0 {
                    return Err(Error::invalid_argument("counter delta must not be zero"));
                }
                MutateSpec::Counter { path, delta }
            }
        })
    }
}

fn check_spec_count(count: usize) -> Result<()> {
    if count == 0 {
        return Err(Error::invalid_argument("at least one instruction is required"));
    }
    if count > MAX_SUBDOC_SPECS {
        return Err(Error::invalid_argument(format!(
            "{} instructions given; the limit is {}",
            count, MAX_SUBDOC_SPECS
        )));
    }
    Ok(())
}

impl Connection {
    fn lookup_in_call(
        &self,
        key: &str,
        specs: Vec<LookupInSpec>,
        options: TimeoutOptions,
    ) -> Result<Call<Response, LookupInResult>> {
        check_spec_count(specs.len())?;
        let specs = specs.into_iter().map(LookupInSpec::into_engine).collect();
        self.kv_call(
            key,
            Operation::LookupIn { specs },
            options.timeout,
            convert::lookup_in_result,
        )
    }

    fn mutate_in_call(
        &self,
        key: &str,
        specs: Vec<MutateInSpec>,
        options: MutateInOptions,
    ) -> Result<Call<Response, MutateInResult>> {
        check_spec_count(specs.len())?;
        let specs = specs
            .into_iter()
            .map(MutateInSpec::into_engine)
            .collect::<Result<Vec<_>>>()?;
        let op = Operation::MutateIn {
            specs,
            cas: options.cas.unwrap_or(0),
            expiry: options.expiry,
        };
        self.kv_call(key, op, options.timeout, convert::mutate_in_result)
    }

    /// Read parts of a document.
    ///
    /// A path error fails only its own entry; the result carries one entry
    /// per instruction.
    pub fn lookup_in(
        &self,
        key: &str,
        specs: Vec<LookupInSpec>,
        options: TimeoutOptions,
    ) -> Result<LookupInResult> {
        self.blocking(self.lookup_in_call(key, specs, options)?)
    }

    /// [`lookup_in`](Connection::lookup_in) with callbacks.
    pub fn lookup_in_with(
        &self,
        key: &str,
        specs: Vec<LookupInSpec>,
        options: TimeoutOptions,
        callbacks: Callbacks<LookupInResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.lookup_in_call(key, specs, options)?, callbacks)
    }

    /// Change parts of a document atomically.
    ///
    /// Either every instruction applies or none does; the first failing
    /// instruction's error is returned.
    pub fn mutate_in(
        &self,
        key: &str,
        specs: Vec<MutateInSpec>,
        options: MutateInOptions,
    ) -> Result<MutateInResult> {
        self.blocking(self.mutate_in_call(key, specs, options)?)
    }

    /// [`mutate_in`](Connection::mutate_in) with callbacks.
    pub fn mutate_in_with(
        &self,
        key: &str,
        specs: Vec<MutateInSpec>,
        options: MutateInOptions,
        callbacks: Callbacks<MutateInResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.mutate_in_call(key, specs, options)?, callbacks)
    }
}
