//! Host-visible result types.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec::Content;
use tether_core::{Error, Result, RowStream};
use tether_engine::MutationToken;

/// Document read.
#[derive(Debug, Clone, PartialEq)]
pub struct GetResult {
    /// Decoded content
    pub content: Content,
    /// CAS of the document
    pub cas: u64,
    /// Stored common flags
    pub flags: u32,
}

impl GetResult {
    /// Deserialize the content into `T`.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.content.decode()
    }
}

/// Existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistsResult {
    /// Whether the document exists
    pub exists: bool,
    /// CAS of the document; 0 when it does not exist
    pub cas: u64,
}

/// Acknowledged mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationResult {
    /// CAS after the mutation
    pub cas: u64,
    /// Partition state after the mutation, when the engine reports one
    pub token: Option<MutationToken>,
}

/// Counter update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterResult {
    /// Value after the update
    pub content: u64,
    /// CAS after the update
    pub cas: u64,
    /// Partition state after the update
    pub token: Option<MutationToken>,
}

/// Outcome of one subdocument instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubdocEntry {
    /// Path the instruction referred to
    pub path: String,
    /// Value produced, or the instruction's error
    pub outcome: Result<Option<serde_json::Value>>,
}

fn entry<'a>(entries: &'a [SubdocEntry], index: usize) -> Result<&'a SubdocEntry> {
    entries.get(index).ok_or_else(|| {
        Error::invalid_argument(format!(
            "index {} out of range for {} entries",
            index,
            entries.len()
        ))
    })
}

fn entry_as<T: DeserializeOwned>(entries: &[SubdocEntry], index: usize) -> Result<T> {
    let entry = entry(entries, index)?;
    match &entry.outcome {
        Ok(Some(value)) => {
            serde_json::from_value(value.clone()).map_err(|e| Error::build_result(e.to_string()))
        }
        Ok(None) => Err(Error::build_result(format!(
            "no value for path {:?}",
            entry.path
        ))),
        Err(e) => Err(e.clone()),
    }
}

/// Subdocument lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupInResult {
    /// CAS of the document
    pub cas: u64,
    /// One entry per lookup instruction, in order
    pub entries: Vec<SubdocEntry>,
}

impl LookupInResult {
    /// Deserialize the value of instruction `index`.
    pub fn content_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        entry_as(&self.entries, index)
    }

    /// Whether instruction `index` found its path.
    pub fn exists(&self, index: usize) -> Result<bool> {
        match &entry(&self.entries, index)?.outcome {
            Ok(_) => Ok(true),
            Err(e) if e.code() == Some(tether_core::ErrorCode::PathNotFound) => Ok(false),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Subdocument mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutateInResult {
    /// CAS after the mutation
    pub cas: u64,
    /// Partition state after the mutation
    pub token: Option<MutationToken>,
    /// One entry per mutation instruction, in order
    pub entries: Vec<SubdocEntry>,
}

impl MutateInResult {
    /// Deserialize the value produced by instruction `index` (counters).
    pub fn content_as<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        entry_as(&self.entries, index)
    }
}

/// Copy of a document read from the active node or a replica.
#[derive(Debug, Clone, PartialEq)]
pub struct GetReplicaResult {
    /// Decoded content
    pub content: Content,
    /// CAS of the copy
    pub cas: u64,
    /// Whether the copy came from a replica
    pub is_replica: bool,
}

impl GetReplicaResult {
    /// Deserialize the content into `T`.
    pub fn content_as<T: DeserializeOwned>(&self) -> Result<T> {
        self.content.decode()
    }
}

/// Metrics of a query or analytics statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetrics {
    /// Time spent producing rows
    pub elapsed: Duration,
    /// Rows delivered
    pub result_count: u64,
}

/// Final metadata of a query or analytics statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryMetaData {
    /// Engine-assigned request identifier
    pub request_id: String,
    /// Identifier supplied by the caller
    pub client_context_id: Option<String>,
    /// Completion status
    pub status: String,
    /// Metrics
    pub metrics: QueryMetrics,
    /// Non-fatal warnings
    pub warnings: Vec<String>,
}

/// One view row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRow {
    /// Document that emitted the row
    pub id: Option<String>,
    /// Emitted key
    pub key: serde_json::Value,
    /// Emitted value
    pub value: serde_json::Value,
}

/// Final metadata of a view request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewMetaData {
    /// Rows in the index before skip and limit
    pub total_rows: u64,
    /// Rows delivered
    pub row_count: u64,
}

/// Rows of a query statement.
pub type QueryResult = RowStream<serde_json::Value, QueryMetaData>;
/// Rows of an analytics statement.
pub type AnalyticsResult = RowStream<serde_json::Value, QueryMetaData>;
/// Rows of a view request.
pub type ViewResult = RowStream<ViewRow, ViewMetaData>;
/// Copies returned by [`get_all_replicas`](crate::Connection::get_all_replicas).
pub type ReplicaStream = RowStream<GetReplicaResult, ()>;
