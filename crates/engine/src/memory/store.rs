//! Per-bucket document storage.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::subdoc::{self, WriteMode};
use crate::error::{EngineError, EngineResult};
use crate::request::{DocumentId, LookupSpec, MutateSpec, Operation, RawDocument};
use crate::response::{MutationToken, Response, SubdocField};
use tether_core::ErrorCode;

const NUM_PARTITIONS: u64 = 1024;

/// Key of a document inside a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct DocKey {
    pub scope: String,
    pub collection: String,
    pub key: String,
}

impl From<&DocumentId> for DocKey {
    fn from(id: &DocumentId) -> Self {
        Self {
            scope: id.scope.clone(),
            collection: id.collection.clone(),
            key: id.key.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StoredDoc {
    pub content: RawDocument,
    pub cas: u64,
    expires_at: Option<Instant>,
}

impl StoredDoc {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map_or(false, |at| at <= now)
    }
}

fn expiry_at(expiry: Option<Duration>) -> Option<Instant> {
    expiry.filter(|e| !e.is_zero()).map(|e| Instant::now() + e)
}

fn check_cas(expected: u64, current: &StoredDoc) -> EngineResult<()> {
    if expected != 0 && expected != current.cas {
        return Err(EngineError::new(
            ErrorCode::CasMismatch,
            format!("cas mismatch: expected {}, found {}", expected, current.cas),
        ));
    }
    Ok(())
}

fn parse_json(content: &RawDocument) -> EngineResult<Value> {
    serde_json::from_slice(&content.bytes)
        .map_err(|_| EngineError::new(ErrorCode::DocumentNotJson, "document is not JSON"))
}

fn parse_value(bytes: &[u8]) -> EngineResult<Value> {
    serde_json::from_slice(bytes)
        .map_err(|e| EngineError::new(ErrorCode::InvalidArgument, format!("value is not JSON: {}", e)))
}

fn encode(value: &Value) -> Vec<u8> {
    // Serializing a Value cannot fail
    serde_json::to_vec(value).unwrap_or_default()
}

fn parse_counter(content: &RawDocument) -> EngineResult<u64> {
    std::str::from_utf8(&content.bytes)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .ok_or_else(|| EngineError::new(ErrorCode::DeltaInvalid, "document is not a counter"))
}

fn path_error(code: ErrorCode, index: usize, path: &str) -> EngineError {
    EngineError::new(code, format!("spec {} ({}) failed", index, path))
}

/// Documents of one bucket.
pub(crate) struct Bucket {
    name: String,
    docs: DashMap<DocKey, StoredDoc>,
    cas_clock: AtomicU64,
    seqno: AtomicU64,
    partition_uuid: u64,
}

impl Bucket {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: DashMap::new(),
            cas_clock: AtomicU64::new(1),
            seqno: AtomicU64::new(0),
            partition_uuid: uuid::Uuid::new_v4().as_u64_pair().0,
        }
    }

    fn next_cas(&self) -> u64 {
        self.cas_clock.fetch_add(1, Ordering::Relaxed)
    }

    fn token(&self, key: &DocKey) -> MutationToken {
        let mut hasher = DefaultHasher::new();
        key.key.hash(&mut hasher);
        MutationToken {
            partition_id: (hasher.finish() % NUM_PARTITIONS) as u16,
            partition_uuid: self.partition_uuid,
            sequence_number: self.seqno.fetch_add(1, Ordering::Relaxed) + 1,
            bucket: self.name.clone(),
        }
    }

    /// Live copy of a document; expired documents are purged on access.
    pub(crate) fn read(&self, id: &DocumentId) -> EngineResult<StoredDoc> {
        let key = DocKey::from(id);
        let now = Instant::now();
        if let Some(doc) = self.docs.get(&key) {
            if !doc.is_expired(now) {
                return Ok(doc.clone());
            }
        }
        self.docs.remove_if(&key, |_, doc| doc.is_expired(now));
        Err(EngineError::not_found(&id.key))
    }

    /// Atomically replace the document state.
    ///
    /// `f` sees the live document (if any) and returns the new state; `None`
    /// removes the document.
    fn update<R>(
        &self,
        key: DocKey,
        f: impl FnOnce(Option<StoredDoc>) -> EngineResult<(Option<StoredDoc>, R)>,
    ) -> EngineResult<R> {
        let now = Instant::now();
        match self.docs.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = Some(entry.get().clone()).filter(|doc| !doc.is_expired(now));
                let (next, out) = f(current)?;
                match next {
                    Some(doc) => {
                        entry.insert(doc);
                    }
                    None => {
                        entry.remove();
                    }
                }
                Ok(out)
            }
            Entry::Vacant(entry) => {
                let (next, out) = f(None)?;
                if let Some(doc) = next {
                    entry.insert(doc);
                }
                Ok(out)
            }
        }
    }

    /// Live documents in key order.
    pub(crate) fn snapshot(&self) -> Vec<(DocKey, StoredDoc)> {
        let now = Instant::now();
        let mut docs: Vec<(DocKey, StoredDoc)> = self
            .docs
            .iter()
            .filter(|entry| !entry.value().is_expired(now))
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        docs.sort_by(|a, b| a.0.cmp(&b.0));
        docs
    }

    pub(crate) fn len(&self) -> usize {
        let now = Instant::now();
        self.docs.iter().filter(|e| !e.value().is_expired(now)).count()
    }

    /// Apply a single-document operation.
    pub(crate) fn apply(&self, id: &DocumentId, op: Operation) -> EngineResult<Response> {
        let key = DocKey::from(id);
        let missing = || EngineError::not_found(&id.key);
        match op {
            Operation::Get => {
                let doc = self.read(id)?;
                Ok(Response::Document {
                    content: doc.content,
                    cas: doc.cas,
                })
            }
            Operation::GetAnyReplica => {
                let doc = self.read(id)?;
                Ok(Response::Replica {
                    content: doc.content,
                    cas: doc.cas,
                    is_replica: false,
                })
            }
            Operation::Exists => match self.read(id) {
                Ok(doc) => Ok(Response::Exists {
                    exists: true,
                    cas: doc.cas,
                }),
                Err(e) if e.code == ErrorCode::DocumentNotFound => Ok(Response::Exists {
                    exists: false,
                    cas: 0,
                }),
                Err(e) => Err(e),
            },
            Operation::GetAndTouch { expiry } => {
                let cas = self.next_cas();
                self.update(key, |current| {
                    let mut doc = current.ok_or_else(missing)?;
                    doc.cas = cas;
                    doc.expires_at = expiry_at(Some(expiry));
                    let response = Response::Document {
                        content: doc.content.clone(),
                        cas,
                    };
                    Ok((Some(doc), response))
                })
            }
            Operation::Touch { expiry } => {
                let cas = self.next_cas();
                self.update(key, |current| {
                    let mut doc = current.ok_or_else(missing)?;
                    doc.cas = cas;
                    doc.expires_at = expiry_at(Some(expiry));
                    Ok((Some(doc), Response::Mutation { cas, token: None }))
                })
            }
            Operation::Upsert { content, expiry } => {
                let cas = self.next_cas();
                let token = self.token(&key);
                self.update(key, |_| {
                    let doc = StoredDoc {
                        content,
                        cas,
                        expires_at: expiry_at(expiry),
                    };
                    Ok((Some(doc), Response::Mutation { cas, token: Some(token) }))
                })
            }
            Operation::Insert { content, expiry } => {
                let cas = self.next_cas();
                let token = self.token(&key);
                self.update(key, |current| {
                    if current.is_some() {
                        return Err(EngineError::new(
                            ErrorCode::DocumentExists,
                            format!("document exists: {}", id.key),
                        ));
                    }
                    let doc = StoredDoc {
                        content,
                        cas,
                        expires_at: expiry_at(expiry),
                    };
                    Ok((Some(doc), Response::Mutation { cas, token: Some(token) }))
                })
            }
            Operation::Replace {
                content,
                expiry,
                cas: expected,
            } => {
                let cas = self.next_cas();
                let token = self.token(&key);
                self.update(key, |current| {
                    let current = current.ok_or_else(missing)?;
                    check_cas(expected, &current)?;
                    let doc = StoredDoc {
                        content,
                        cas,
                        expires_at: expiry_at(expiry),
                    };
                    Ok((Some(doc), Response::Mutation { cas, token: Some(token) }))
                })
            }
            Operation::Remove { cas: expected } => {
                let cas = self.next_cas();
                let token = self.token(&key);
                self.update(key, |current| {
                    let current = current.ok_or_else(missing)?;
                    check_cas(expected, &current)?;
                    Ok((None, Response::Mutation { cas, token: Some(token) }))
                })
            }
            Operation::Increment {
                delta,
                initial,
                expiry,
            } => self.counter(key, id, initial, expiry, |v| v.wrapping_add(delta)),
            Operation::Decrement {
                delta,
                initial,
                expiry,
            } => self.counter(key, id, initial, expiry, |v| v.saturating_sub(delta)),
            Operation::Append { bytes, cas: expected } => {
                self.concat(key, id, expected, |doc| doc.extend_from_slice(&bytes))
            }
            Operation::Prepend { bytes, cas: expected } => self.concat(key, id, expected, |doc| {
                let mut joined = bytes.clone();
                joined.append(doc);
                *doc = joined;
            }),
            Operation::LookupIn { specs } => {
                let doc = self.read(id)?;
                let root = parse_json(&doc.content)?;
                let fields = specs.iter().map(|spec| lookup(&root, spec)).collect();
                Ok(Response::LookupIn {
                    cas: doc.cas,
                    fields,
                })
            }
            Operation::MutateIn {
                specs,
                cas: expected,
                expiry,
            } => {
                let cas = self.next_cas();
                let token = self.token(&key);
                self.update(key, |current| {
                    let mut doc = current.ok_or_else(missing)?;
                    check_cas(expected, &doc)?;
                    let mut root = parse_json(&doc.content)?;
                    let mut fields = Vec::with_capacity(specs.len());
                    for (index, spec) in specs.iter().enumerate() {
                        fields.push(mutate(&mut root, index, spec)?);
                    }
                    doc.content.bytes = encode(&root);
                    doc.cas = cas;
                    if expiry.is_some() {
                        doc.expires_at = expiry_at(expiry);
                    }
                    let response = Response::MutateIn {
                        cas,
                        token: Some(token),
                        fields,
                    };
                    Ok((Some(doc), response))
                })
            }
        }
    }

    fn counter(
        &self,
        key: DocKey,
        id: &DocumentId,
        initial: Option<u64>,
        expiry: Option<Duration>,
        step: impl FnOnce(u64) -> u64,
    ) -> EngineResult<Response> {
        let cas = self.next_cas();
        let token = self.token(&key);
        self.update(key, |current| {
            let (value, doc) = match current {
                Some(mut doc) => {
                    let value = step(parse_counter(&doc.content)?);
                    doc.content.bytes = value.to_string().into_bytes();
                    doc.cas = cas;
                    (value, doc)
                }
                None => {
                    let value = initial.ok_or_else(|| EngineError::not_found(&id.key))?;
                    let doc = StoredDoc {
                        content: RawDocument::new(value.to_string().into_bytes(), 0),
                        cas,
                        expires_at: expiry_at(expiry),
                    };
                    (value, doc)
                }
            };
            let response = Response::Counter {
                value,
                cas,
                token: Some(token),
            };
            Ok((Some(doc), response))
        })
    }

    fn concat(
        &self,
        key: DocKey,
        id: &DocumentId,
        expected: u64,
        join: impl FnOnce(&mut Vec<u8>),
    ) -> EngineResult<Response> {
        let cas = self.next_cas();
        let token = self.token(&key);
        self.update(key, |current| {
            let mut doc = current.ok_or_else(|| EngineError::not_found(&id.key))?;
            check_cas(expected, &doc)?;
            join(&mut doc.content.bytes);
            doc.cas = cas;
            Ok((Some(doc), Response::Mutation { cas, token: Some(token) }))
        })
    }
}

fn lookup(root: &Value, spec: &LookupSpec) -> SubdocField {
    let path = spec.path();
    let segments = match subdoc::parse_path(path) {
        Ok(segments) => segments,
        Err(code) => return SubdocField::failed(path, code),
    };
    let outcome = match spec {
        LookupSpec::Get { .. } => subdoc::get(root, &segments).map(|v| Some(encode(v))),
        LookupSpec::Exists { .. } => subdoc::get(root, &segments).map(|_| None),
        LookupSpec::Count { .. } => {
            subdoc::count(root, &segments).map(|n| Some(n.to_string().into_bytes()))
        }
    };
    match outcome {
        Ok(value) => SubdocField::ok(path, value),
        Err(code) => SubdocField::failed(path, code),
    }
}

fn mutate(root: &mut Value, index: usize, spec: &MutateSpec) -> EngineResult<SubdocField> {
    let path = spec.path();
    let segments = subdoc::parse_path(path).map_err(|code| path_error(code, index, path))?;
    let fail = |code| path_error(code, index, path);
    let value = match spec {
        MutateSpec::Upsert {
            value, create_path, ..
        } => {
            subdoc::set(root, &segments, parse_value(value)?, WriteMode::Upsert, *create_path)
                .map_err(fail)?;
            None
        }
        MutateSpec::Insert {
            value, create_path, ..
        } => {
            subdoc::set(root, &segments, parse_value(value)?, WriteMode::Insert, *create_path)
                .map_err(fail)?;
            None
        }
        MutateSpec::Replace { value, .. } => {
            subdoc::set(root, &segments, parse_value(value)?, WriteMode::Replace, false)
                .map_err(fail)?;
            None
        }
        MutateSpec::Remove { .. } => {
            subdoc::remove(root, &segments).map_err(fail)?;
            None
        }
        MutateSpec::ArrayAppend { value, .. } => {
            subdoc::array_append(root, &segments, parse_value(value)?).map_err(fail)?;
            None
        }
        MutateSpec::Counter { delta, .. } => {
            let next = subdoc::counter(root, &segments, *delta).map_err(fail)?;
            Some(next.to_string().into_bytes())
        }
    };
    Ok(SubdocField::ok(path, value))
}
