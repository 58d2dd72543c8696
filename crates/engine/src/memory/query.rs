//! Statement and view evaluation for the in-memory engine.
//!
//! Only `SELECT * FROM <keyspace> [LIMIT n]` is understood. Anything else
//! must be registered as a stub with [`MemoryEngine::stub_query`] or fails
//! with a parsing error.
//!
//! [`MemoryEngine::stub_query`]: super::MemoryEngine::stub_query

use std::sync::Arc;

use serde_json::Value;

use super::store::Bucket;
use crate::error::{EngineError, EngineResult};
use crate::request::ViewParams;
use tether_core::ErrorCode;

/// Map function of a view: emits `(key, value)` pairs for a document.
pub type ViewMap = Arc<dyn Fn(&str, &Value) -> Vec<(Value, Value)> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectAll {
    pub keyspace: String,
    pub limit: Option<usize>,
}

pub(crate) fn parse_statement(statement: &str) -> EngineResult<SelectAll> {
    let parse_error = || {
        EngineError::new(
            ErrorCode::ParsingFailure,
            format!("syntax error in statement: {}", statement),
        )
    };
    let trimmed = statement.trim().trim_end_matches(';');
    let words: Vec<&str> = trimmed.split_whitespace().collect();
    let keyword = |i: usize, expected: &str| {
        words
            .get(i)
            .map_or(false, |w| w.eq_ignore_ascii_case(expected))
    };
    if !(keyword(0, "select") && words.get(1) == Some(&"*") && keyword(2, "from")) {
        return Err(parse_error());
    }
    let keyspace = words
        .get(3)
        .map(|w| w.trim_matches('`'))
        .filter(|w| !w.is_empty())
        .ok_or_else(parse_error)?
        .to_string();
    let limit = match words.len() {
        4 => None,
        6 if keyword(4, "limit") => Some(words[5].parse().map_err(|_| parse_error())?),
        _ => return Err(parse_error()),
    };
    Ok(SelectAll { keyspace, limit })
}

/// Rows of `SELECT *`: each JSON document wrapped in an object keyed by the
/// keyspace name.
pub(crate) fn select_all(bucket: &Bucket, select: &SelectAll) -> Vec<Value> {
    bucket
        .snapshot()
        .into_iter()
        .filter_map(|(_, doc)| serde_json::from_slice::<Value>(&doc.content.bytes).ok())
        .map(|doc| {
            let mut row = serde_json::Map::new();
            row.insert(select.keyspace.clone(), doc);
            Value::Object(row)
        })
        .take(select.limit.unwrap_or(usize::MAX))
        .collect()
}

/// One emitted view row.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ViewRow {
    pub id: String,
    pub key: Value,
    pub value: Value,
}

/// Evaluate a view, returning the selected rows and the index size.
pub(crate) fn run_view(bucket: &Bucket, map: &ViewMap, params: &ViewParams) -> (Vec<ViewRow>, u64) {
    let mut rows: Vec<ViewRow> = Vec::new();
    for (key, doc) in bucket.snapshot() {
        let Ok(json) = serde_json::from_slice::<Value>(&doc.content.bytes) else {
            continue;
        };
        for (emitted_key, value) in map(&key.key, &json) {
            rows.push(ViewRow {
                id: key.key.clone(),
                key: emitted_key,
                value,
            });
        }
    }
    // Values have no total order; their canonical encoding stands in for one
    rows.sort_by(|a, b| {
        a.key
            .to_string()
            .cmp(&b.key.to_string())
            .then_with(|| a.id.cmp(&b.id))
    });
    if params.descending {
        rows.reverse();
    }
    let total = rows.len() as u64;
    let selected = rows
        .into_iter()
        .skip(params.skip)
        .take(params.limit.unwrap_or(usize::MAX))
        .collect();
    (selected, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DocumentId, Operation, RawDocument};
    use serde_json::json;

    fn bucket_with(docs: &[(&str, Value)]) -> Bucket {
        let bucket = Bucket::new("travel");
        for (key, value) in docs {
            bucket
                .apply(
                    &DocumentId::new("travel", *key),
                    Operation::Upsert {
                        content: RawDocument::new(serde_json::to_vec(value).unwrap(), 0),
                        expiry: None,
                    },
                )
                .unwrap();
        }
        bucket
    }

    #[test]
    fn test_parse_statement() {
        assert_eq!(
            parse_statement("SELECT * FROM `travel`").unwrap(),
            SelectAll {
                keyspace: "travel".into(),
                limit: None
            }
        );
        assert_eq!(
            parse_statement("select * from travel limit 3;").unwrap().limit,
            Some(3)
        );
        for bad in ["SELECT name FROM travel", "SELECT * FROM", "DELETE FROM x", "SELECT * FROM t LIMIT x"] {
            assert_eq!(parse_statement(bad).unwrap_err().code, ErrorCode::ParsingFailure);
        }
    }

    #[test]
    fn test_select_all_orders_by_key_and_limits() {
        let bucket = bucket_with(&[("b", json!(2)), ("a", json!(1)), ("c", json!(3))]);
        let select = SelectAll {
            keyspace: "travel".into(),
            limit: Some(2),
        };
        assert_eq!(
            select_all(&bucket, &select),
            vec![json!({"travel": 1}), json!({"travel": 2})]
        );
    }

    #[test]
    fn test_view_sort_skip_limit() {
        let bucket = bucket_with(&[
            ("x", json!({"city": "Paris"})),
            ("y", json!({"city": "Berlin"})),
            ("z", json!({"name": "no city"})),
        ]);
        let map: ViewMap = Arc::new(|_id, doc| match doc.get("city") {
            Some(city) => vec![(city.clone(), Value::Null)],
            None => vec![],
        });
        let (rows, total) = run_view(&bucket, &map, &ViewParams::default());
        assert_eq!(total, 2);
        assert_eq!(rows[0].id, "y");
        assert_eq!(rows[1].id, "x");

        let params = ViewParams {
            limit: Some(1),
            skip: 0,
            descending: true,
        };
        let (rows, _) = run_view(&bucket, &map, &params);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].key, json!("Paris"));
    }
}
