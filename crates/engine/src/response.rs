//! Typed responses delivered to completion handlers.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::request::{RawDocument, ServiceType};
use tether_core::ErrorCode;

/// Identifies the state of a partition after a mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationToken {
    /// Partition the document lives in
    pub partition_id: u16,
    /// Partition history identifier
    pub partition_uuid: u64,
    /// Sequence number assigned to the mutation
    pub sequence_number: u64,
    /// Bucket the partition belongs to
    pub bucket: String,
}

/// Outcome of one subdocument instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubdocField {
    /// Path the instruction referred to
    pub path: String,
    /// Error code when the instruction failed
    pub error: Option<ErrorCode>,
    /// Encoded JSON value, when the instruction produced one
    pub value: Option<Vec<u8>>,
}

impl SubdocField {
    /// Successful instruction.
    pub fn ok(path: &str, value: Option<Vec<u8>>) -> Self {
        Self {
            path: path.to_string(),
            error: None,
            value,
        }
    }

    /// Failed instruction.
    pub fn failed(path: &str, code: ErrorCode) -> Self {
        Self {
            path: path.to_string(),
            error: Some(code),
            value: None,
        }
    }
}

/// Response to a single-document [`Request`](crate::Request).
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Document content
    Document { content: RawDocument, cas: u64 },
    /// Existence check
    Exists { exists: bool, cas: u64 },
    /// Mutation acknowledged
    Mutation {
        cas: u64,
        token: Option<MutationToken>,
    },
    /// Counter value after the update
    Counter {
        value: u64,
        cas: u64,
        token: Option<MutationToken>,
    },
    /// Replica read
    Replica {
        content: RawDocument,
        cas: u64,
        is_replica: bool,
    },
    /// Subdocument lookup
    LookupIn { cas: u64, fields: Vec<SubdocField> },
    /// Subdocument mutation
    MutateIn {
        cas: u64,
        token: Option<MutationToken>,
        fields: Vec<SubdocField>,
    },
}

impl Response {
    /// Variant name, used when a response has an unexpected shape.
    pub fn kind(&self) -> &'static str {
        match self {
            Response::Document { .. } => "document",
            Response::Exists { .. } => "exists",
            Response::Mutation { .. } => "mutation",
            Response::Counter { .. } => "counter",
            Response::Replica { .. } => "replica",
            Response::LookupIn { .. } => "lookup_in",
            Response::MutateIn { .. } => "mutate_in",
        }
    }
}

/// One row of a streaming response.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRow {
    /// Encoded JSON row of a query or analytics statement
    Json(Vec<u8>),
    /// View row with encoded JSON key and value
    View {
        id: Option<String>,
        key: Vec<u8>,
        value: Vec<u8>,
    },
    /// Copy of a document from the active node or a replica
    Replica {
        content: RawDocument,
        cas: u64,
        is_replica: bool,
    },
}

/// Final metadata of a streaming response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Engine-assigned request identifier
    pub request_id: String,
    /// Identifier supplied by the caller, if any
    pub client_context_id: Option<String>,
    /// Completion status
    pub status: String,
    /// Number of rows delivered
    pub row_count: u64,
    /// Total rows in the index (views only)
    pub total_rows: Option<u64>,
    /// Time spent producing the rows
    pub elapsed: Duration,
    /// Non-fatal warnings
    pub warnings: Vec<String>,
}

/// Connection state of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Diagnostics of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDiagnostics {
    /// Service the endpoint serves
    pub service: ServiceType,
    /// Remote address
    pub remote: String,
    /// Current state
    pub state: EndpointState,
    /// Bucket the endpoint is bound to, if any
    pub bucket: Option<String>,
}

/// Passive health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    /// Report identifier
    pub id: String,
    /// Version of the report format
    pub version: u32,
    /// Endpoint states
    pub endpoints: Vec<EndpointDiagnostics>,
}

/// Outcome of pinging one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PingState {
    Ok,
    Timeout,
    Error,
}

/// Ping result for one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPing {
    /// Service pinged
    pub service: ServiceType,
    /// Remote address
    pub remote: String,
    /// Round trip time
    pub latency: Duration,
    /// Outcome
    pub state: PingState,
}

/// Active health report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingReport {
    /// Report identifier
    pub id: String,
    /// Version of the report format
    pub version: u32,
    /// Per-endpoint results
    pub services: Vec<EndpointPing>,
}
