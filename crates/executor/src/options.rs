//! Per-operation options.
//!
//! Every field is optional. A `timeout` of `None` uses the connection's
//! default for the operation's service, and a `transcoder` of `None` uses the
//! connection's transcoder.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::Transcoder;
use tether_engine::ServiceType;

fn transcoder_set(transcoder: &Option<Arc<dyn Transcoder>>) -> bool {
    transcoder.is_some()
}

/// Options of `get`, `get_and_touch` and replica reads.
#[derive(Clone, Default)]
pub struct ReadOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Transcoder used to decode the document
    pub transcoder: Option<Arc<dyn Transcoder>>,
}

impl ReadOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Decode with `transcoder`.
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }
}

impl fmt::Debug for ReadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOptions")
            .field("timeout", &self.timeout)
            .field("transcoder", &transcoder_set(&self.transcoder))
            .finish()
    }
}

/// Options of `upsert`, `insert` and `replace`.
#[derive(Clone, Default)]
pub struct StoreOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Expiry relative to now; never expires when absent
    pub expiry: Option<Duration>,
    /// Expected CAS (`replace` only)
    pub cas: Option<u64>,
    /// Transcoder used to encode the document
    pub transcoder: Option<Arc<dyn Transcoder>>,
}

impl StoreOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Expire the document after `expiry`.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Require the stored CAS to match.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }

    /// Encode with `transcoder`.
    pub fn transcoder(mut self, transcoder: Arc<dyn Transcoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("timeout", &self.timeout)
            .field("expiry", &self.expiry)
            .field("cas", &self.cas)
            .field("transcoder", &transcoder_set(&self.transcoder))
            .finish()
    }
}

/// Options of `remove`, `append` and `prepend`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CasOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Expected CAS
    pub cas: Option<u64>,
}

impl CasOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require the stored CAS to match.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }
}

/// Options of operations that only take a time budget.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeoutOptions {
    /// Time budget
    pub timeout: Option<Duration>,
}

impl TimeoutOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Options of `increment` and `decrement`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Amount to add or subtract
    pub delta: u64,
    /// Value to create the counter with when it does not exist; the
    /// operation fails with `DocumentNotFound` when absent
    pub initial: Option<u64>,
    /// Expiry of a newly created counter
    pub expiry: Option<Duration>,
}

impl Default for CounterOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            delta: 1,
            initial: None,
            expiry: None,
        }
    }
}

impl CounterOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Change by `delta`.
    pub fn delta(mut self, delta: u64) -> Self {
        self.delta = delta;
        self
    }

    /// Create the counter with `initial` when missing.
    pub fn initial(mut self, initial: u64) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Expire a newly created counter after `expiry`.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Options of `mutate_in`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutateInOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Expected CAS
    pub cas: Option<u64>,
    /// New expiry of the document
    pub expiry: Option<Duration>,
}

impl MutateInOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Require the stored CAS to match.
    pub fn cas(mut self, cas: u64) -> Self {
        self.cas = Some(cas);
        self
    }

    /// Expire the document after `expiry`.
    pub fn expiry(mut self, expiry: Duration) -> Self {
        self.expiry = Some(expiry);
        self
    }
}

/// Options of `query` and `analytics_query`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOptions {
    /// Time budget for the whole statement
    pub timeout: Option<Duration>,
    /// Positional parameters (`$1`, `$2`, ...)
    pub positional: Vec<serde_json::Value>,
    /// Named parameters, without the leading `$`
    pub named: BTreeMap<String, serde_json::Value>,
    /// Identifier echoed back in the metadata
    pub client_context_id: Option<String>,
}

impl QueryOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Append a positional parameter.
    pub fn positional(mut self, value: serde_json::Value) -> Self {
        self.positional.push(value);
        self
    }

    /// Set a named parameter.
    pub fn named(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// Set the client context identifier.
    pub fn client_context_id(mut self, id: impl Into<String>) -> Self {
        self.client_context_id = Some(id.into());
        self
    }
}

/// Options of `view_query`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ViewOptions {
    /// Time budget
    pub timeout: Option<Duration>,
    /// Maximum number of rows
    pub limit: Option<usize>,
    /// Rows to skip
    pub skip: usize,
    /// Descending key order
    pub descending: bool,
}

impl ViewOptions {
    /// Set the time budget.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return at most `limit` rows.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skip the first `skip` rows.
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    /// Return rows in descending key order.
    pub fn descending(mut self, descending: bool) -> Self {
        self.descending = descending;
        self
    }
}

/// Options of `ping`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PingOptions {
    /// Report identifier; generated when absent
    pub report_id: Option<String>,
    /// Services to ping; every service when empty
    pub services: Vec<ServiceType>,
}

impl PingOptions {
    /// Set the report identifier.
    pub fn report_id(mut self, id: impl Into<String>) -> Self {
        self.report_id = Some(id.into());
        self
    }

    /// Ping `service` (may be repeated).
    pub fn service(mut self, service: ServiceType) -> Self {
        self.services.push(service);
        self
    }
}
