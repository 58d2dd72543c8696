//! Typed requests handed to a [`Cluster`](crate::Cluster).

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Name of the default scope and collection.
pub const DEFAULT_NAME: &str = "_default";

/// Location of a document: bucket, scope, collection and key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId {
    /// Bucket name
    pub bucket: String,
    /// Scope name
    pub scope: String,
    /// Collection name
    pub collection: String,
    /// Document key
    pub key: String,
}

impl DocumentId {
    /// Document in the default collection of `bucket`.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            scope: DEFAULT_NAME.to_string(),
            collection: DEFAULT_NAME.to_string(),
            key: key.into(),
        }
    }

    /// Place the document in a named scope and collection.
    pub fn in_collection(mut self, scope: impl Into<String>, collection: impl Into<String>) -> Self {
        self.scope = scope.into();
        self.collection = collection.into();
        self
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}/{}",
            self.bucket, self.scope, self.collection, self.key
        )
    }
}

/// Encoded document body and its common flags.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RawDocument {
    /// Encoded bytes
    pub bytes: Vec<u8>,
    /// Common flags describing the encoding
    pub flags: u32,
}

impl RawDocument {
    /// Create a raw document.
    pub fn new(bytes: Vec<u8>, flags: u32) -> Self {
        Self { bytes, flags }
    }
}

/// Subdocument lookup instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LookupSpec {
    /// Read the value at a path
    Get { path: String },
    /// Check whether a path exists
    Exists { path: String },
    /// Count the elements of an array or object
    Count { path: String },
}

impl LookupSpec {
    /// Path the instruction refers to.
    pub fn path(&self) -> &str {
        match self {
            LookupSpec::Get { path } | LookupSpec::Exists { path } | LookupSpec::Count { path } => {
                path
            }
        }
    }
}

/// Subdocument mutation instruction. Values are encoded JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutateSpec {
    /// Create or overwrite the value at a path
    Upsert {
        path: String,
        value: Vec<u8>,
        create_path: bool,
    },
    /// Create the value at a path, failing if it exists
    Insert {
        path: String,
        value: Vec<u8>,
        create_path: bool,
    },
    /// Overwrite the value at an existing path
    Replace { path: String, value: Vec<u8> },
    /// Remove the value at a path
    Remove { path: String },
    /// Append to the array at a path
    ArrayAppend { path: String, value: Vec<u8> },
    /// Add `delta` to the number at a path
    Counter { path: String, delta: i64 },
}

impl MutateSpec {
    /// Path the instruction refers to.
    pub fn path(&self) -> &str {
        match self {
            MutateSpec::Upsert { path, .. }
            | MutateSpec::Insert { path, .. }
            | MutateSpec::Replace { path, .. }
            | MutateSpec::Remove { path }
            | MutateSpec::ArrayAppend { path, .. }
            | MutateSpec::Counter { path, .. } => path,
        }
    }
}

/// Single-document operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Get,
    GetAndTouch { expiry: Duration },
    Exists,
    Upsert { content: RawDocument, expiry: Option<Duration> },
    Insert { content: RawDocument, expiry: Option<Duration> },
    Replace { content: RawDocument, expiry: Option<Duration>, cas: u64 },
    Remove { cas: u64 },
    Touch { expiry: Duration },
    GetAnyReplica,
    Increment { delta: u64, initial: Option<u64>, expiry: Option<Duration> },
    Decrement { delta: u64, initial: Option<u64>, expiry: Option<Duration> },
    Append { bytes: Vec<u8>, cas: u64 },
    Prepend { bytes: Vec<u8>, cas: u64 },
    LookupIn { specs: Vec<LookupSpec> },
    MutateIn { specs: Vec<MutateSpec>, cas: u64, expiry: Option<Duration> },
}

impl Operation {
    /// Short operation name used in logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::GetAndTouch { .. } => "get_and_touch",
            Operation::Exists => "exists",
            Operation::Upsert { .. } => "upsert",
            Operation::Insert { .. } => "insert",
            Operation::Replace { .. } => "replace",
            Operation::Remove { .. } => "remove",
            Operation::Touch { .. } => "touch",
            Operation::GetAnyReplica => "get_any_replica",
            Operation::Increment { .. } => "increment",
            Operation::Decrement { .. } => "decrement",
            Operation::Append { .. } => "append",
            Operation::Prepend { .. } => "prepend",
            Operation::LookupIn { .. } => "lookup_in",
            Operation::MutateIn { .. } => "mutate_in",
        }
    }

    /// Whether the operation may change the document.
    ///
    /// A mutation that times out is reported as an ambiguous timeout.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Operation::Get
                | Operation::Exists
                | Operation::GetAnyReplica
                | Operation::LookupIn { .. }
        )
    }
}

/// Request for a single-document operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Target document
    pub id: DocumentId,
    /// What to do with it
    pub op: Operation,
    /// Time budget; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Request {
    /// Create a request without a timeout.
    pub fn new(id: DocumentId, op: Operation) -> Self {
        Self {
            id,
            op,
            timeout: None,
        }
    }

    /// Set the time budget.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Parameters of a query or analytics statement.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatementParams {
    /// Positional parameters
    pub positional: Vec<serde_json::Value>,
    /// Named parameters, without the leading `$`
    pub named: BTreeMap<String, serde_json::Value>,
    /// Caller-chosen identifier echoed in the metadata
    pub client_context_id: Option<String>,
    /// Bucket the statement is scoped to, if any
    pub bucket: Option<String>,
}

/// Query parameters of a view request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ViewParams {
    /// Maximum number of rows
    pub limit: Option<usize>,
    /// Rows to skip before the first returned row
    pub skip: usize,
    /// Return rows in descending key order
    pub descending: bool,
}

/// Streaming request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamKind {
    /// Query service statement
    Query {
        statement: String,
        params: StatementParams,
    },
    /// Analytics service statement
    Analytics {
        statement: String,
        params: StatementParams,
    },
    /// Map-reduce view
    View {
        bucket: String,
        design_document: String,
        view_name: String,
        params: ViewParams,
    },
    /// Active copy and every replica of a document
    GetAllReplicas { id: DocumentId },
}

impl StreamKind {
    /// Short request name used in logs and spans.
    pub fn name(&self) -> &'static str {
        match self {
            StreamKind::Query { .. } => "query",
            StreamKind::Analytics { .. } => "analytics_query",
            StreamKind::View { .. } => "view_query",
            StreamKind::GetAllReplicas { .. } => "get_all_replicas",
        }
    }
}

/// Request whose result is delivered as a sequence of rows.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// Kind and parameters
    pub kind: StreamKind,
    /// Time budget; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl StreamRequest {
    /// Create a streaming request without a timeout.
    pub fn new(kind: StreamKind) -> Self {
        Self {
            kind,
            timeout: None,
        }
    }

    /// Set the time budget.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Service kinds reported by diagnostics and ping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    KeyValue,
    Query,
    Analytics,
    Views,
}

impl ServiceType {
    /// Every service kind.
    pub const ALL: [ServiceType; 4] = [
        ServiceType::KeyValue,
        ServiceType::Query,
        ServiceType::Analytics,
        ServiceType::Views,
    ];
}

/// Ping request.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PingRequest {
    /// Report identifier; generated when absent
    pub report_id: Option<String>,
    /// Services to ping; all when empty
    pub services: Vec<ServiceType>,
}
