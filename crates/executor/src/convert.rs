//! Conversion from engine payloads to host-visible values.
//!
//! Builders run on I/O threads, inside completion handlers. A builder
//! failure is a local marshaling error ([`Error::BuildResult`]), distinct
//! from an error reported by the engine.

use std::time::Duration;

use crate::codec::Transcoder;
use crate::results::{
    CounterResult, ExistsResult, GetReplicaResult, GetResult, LookupInResult, MutateInResult,
    MutationResult, QueryMetaData, QueryMetrics, SubdocEntry, ViewMetaData, ViewRow,
};
use tether_core::{Error, ErrorContext, Result};
use tether_engine::{EngineError, Response, StreamMeta, StreamRow, SubdocField};

/// Translate an engine error, recording the caller's location.
#[track_caller]
pub(crate) fn build_error(error: EngineError) -> Error {
    Error::Engine {
        code: error.code,
        context: ErrorContext::here(error.message),
    }
}

fn unexpected(expected: &str, got: &Response) -> Error {
    Error::build_result(format!(
        "expected {} response, got {}",
        expected,
        got.kind()
    ))
}

fn subdoc_entries(fields: Vec<SubdocField>) -> Result<Vec<SubdocEntry>> {
    fields
        .into_iter()
        .map(|field| -> Result<SubdocEntry> {
            let outcome = match (field.error, field.value) {
                (Some(code), _) => Err(Error::engine(code, field.path.clone())),
                (None, Some(bytes)) => Ok(Some(
                    serde_json::from_slice(&bytes)
                        .map_err(|e| Error::build_result(format!("invalid subdocument value: {}", e)))?,
                )),
                (None, None) => Ok(None),
            };
            Ok(SubdocEntry {
                path: field.path,
                outcome,
            })
        })
        .collect()
}

pub(crate) fn get_result(response: Response, transcoder: &dyn Transcoder) -> Result<GetResult> {
    match response {
        Response::Document { content, cas } => Ok(GetResult {
            content: transcoder.decode(&content)?,
            cas,
            flags: content.flags,
        }),
        other => Err(unexpected("document", &other)),
    }
}

pub(crate) fn exists_result(response: Response, _: &dyn Transcoder) -> Result<ExistsResult> {
    match response {
        Response::Exists { exists, cas } => Ok(ExistsResult { exists, cas }),
        other => Err(unexpected("exists", &other)),
    }
}

pub(crate) fn mutation_result(response: Response, _: &dyn Transcoder) -> Result<MutationResult> {
    match response {
        Response::Mutation { cas, token } => Ok(MutationResult { cas, token }),
        other => Err(unexpected("mutation", &other)),
    }
}

pub(crate) fn counter_result(response: Response, _: &dyn Transcoder) -> Result<CounterResult> {
    match response {
        Response::Counter { value, cas, token } => Ok(CounterResult {
            content: value,
            cas,
            token,
        }),
        other => Err(unexpected("counter", &other)),
    }
}

pub(crate) fn replica_result(
    response: Response,
    transcoder: &dyn Transcoder,
) -> Result<GetReplicaResult> {
    match response {
        Response::Replica {
            content,
            cas,
            is_replica,
        } => Ok(GetReplicaResult {
            content: transcoder.decode(&content)?,
            cas,
            is_replica,
        }),
        other => Err(unexpected("replica", &other)),
    }
}

pub(crate) fn lookup_in_result(response: Response, _: &dyn Transcoder) -> Result<LookupInResult> {
    match response {
        Response::LookupIn { cas, fields } => Ok(LookupInResult {
            cas,
            entries: subdoc_entries(fields)?,
        }),
        other => Err(unexpected("lookup_in", &other)),
    }
}

pub(crate) fn mutate_in_result(response: Response, _: &dyn Transcoder) -> Result<MutateInResult> {
    match response {
        Response::MutateIn { cas, token, fields } => Ok(MutateInResult {
            cas,
            token,
            entries: subdoc_entries(fields)?,
        }),
        other => Err(unexpected("mutate_in", &other)),
    }
}

pub(crate) fn json_row(row: StreamRow) -> Result<serde_json::Value> {
    match row {
        StreamRow::Json(bytes) => serde_json::from_slice(&bytes)
            .map_err(|e| Error::build_result(format!("invalid row: {}", e))),
        _ => Err(Error::build_result("expected a JSON row")),
    }
}

pub(crate) fn view_row(row: StreamRow) -> Result<ViewRow> {
    match row {
        StreamRow::View { id, key, value } => {
            let decode = |bytes: &[u8]| {
                serde_json::from_slice(bytes)
                    .map_err(|e| Error::build_result(format!("invalid view row: {}", e)))
            };
            Ok(ViewRow {
                id,
                key: decode(&key)?,
                value: decode(&value)?,
            })
        }
        _ => Err(Error::build_result("expected a view row")),
    }
}

pub(crate) fn replica_row(row: StreamRow, transcoder: &dyn Transcoder) -> Result<GetReplicaResult> {
    match row {
        StreamRow::Replica {
            content,
            cas,
            is_replica,
        } => Ok(GetReplicaResult {
            content: transcoder.decode(&content)?,
            cas,
            is_replica,
        }),
        _ => Err(Error::build_result("expected a replica row")),
    }
}

pub(crate) fn query_meta(meta: StreamMeta) -> Result<QueryMetaData> {
    Ok(QueryMetaData {
        request_id: meta.request_id,
        client_context_id: meta.client_context_id,
        status: meta.status,
        metrics: QueryMetrics {
            elapsed: meta.elapsed,
            result_count: meta.row_count,
        },
        warnings: meta.warnings,
    })
}

pub(crate) fn view_meta(meta: StreamMeta) -> Result<ViewMetaData> {
    let total_rows = meta
        .total_rows
        .ok_or_else(|| Error::build_result("view metadata without total_rows"))?;
    Ok(ViewMetaData {
        total_rows,
        row_count: meta.row_count,
    })
}

/// Timeout to send with a request: the caller's, or the connection default.
pub(crate) fn effective_timeout(requested: Option<Duration>, default: Duration) -> Option<Duration> {
    Some(requested.unwrap_or(default))
}
