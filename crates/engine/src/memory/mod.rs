//! In-memory engine.
//!
//! [`MemoryEngine`] implements [`Engine`] without any network: documents live
//! in process, per bucket. Handlers are still invoked on the I/O threads of
//! the context the cluster was connected with, so callers observe the same
//! threading as with a remote engine.
//!
//! Test hooks:
//! - [`hold`](MemoryEngine::hold) parks every newly submitted request until
//!   [`release`](MemoryEngine::release), so a cluster can be closed with
//!   requests outstanding.
//! - [`set_row_chunk_size`](MemoryEngine::set_row_chunk_size) controls how
//!   many rows a streaming request delivers per engine callback.

mod cluster;
mod query;
mod store;
mod subdoc;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::debug;

use self::cluster::{ClusterShared, MemoryCluster, Phase, StreamOutput};
use self::store::Bucket;
use crate::cluster::{Cluster, ClusterConfig, Credentials, Engine};
use crate::error::{EngineError, EngineResult};
use crate::io::IoContext;
use crate::request::{PingRequest, ServiceType, StreamKind};
use crate::response::{
    DiagnosticsReport, EndpointDiagnostics, EndpointPing, EndpointState, PingReport, PingState,
    StreamRow,
};
use tether_core::ErrorCode;

pub use self::query::ViewMap;

/// Default number of rows delivered per engine callback.
pub const DEFAULT_ROW_CHUNK_SIZE: usize = 64;

const REPORT_VERSION: u32 = 2;

/// Server state shared by every cluster connected to one engine.
pub(crate) struct Server {
    buckets: DashMap<String, Arc<Bucket>>,
    users: DashMap<String, String>,
    query_stubs: DashMap<String, Vec<Value>>,
    views: DashMap<(String, String), HashMap<String, ViewMap>>,
    num_replicas: AtomicUsize,
    row_chunk_size: AtomicUsize,
    held: AtomicBool,
    clusters: Mutex<Vec<Weak<ClusterShared>>>,
}

impl Server {
    fn new() -> Self {
        Self {
            buckets: DashMap::new(),
            users: DashMap::new(),
            query_stubs: DashMap::new(),
            views: DashMap::new(),
            num_replicas: AtomicUsize::new(1),
            row_chunk_size: AtomicUsize::new(DEFAULT_ROW_CHUNK_SIZE),
            held: AtomicBool::new(false),
            clusters: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub(crate) fn row_chunk_size(&self) -> usize {
        self.row_chunk_size.load(Ordering::Relaxed).max(1)
    }

    pub(crate) fn has_bucket(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    pub(crate) fn bucket(&self, name: &str) -> EngineResult<Arc<Bucket>> {
        self.buckets
            .get(name)
            .map(|b| Arc::clone(b.value()))
            .ok_or_else(|| EngineError::bucket_not_found(name))
    }

    /// Accept any credentials when no users are registered.
    pub(crate) fn authenticate(&self, credentials: &Credentials) -> EngineResult<()> {
        if self.users.is_empty() {
            return Ok(());
        }
        match self.users.get(&credentials.username) {
            Some(password) if *password == credentials.password => Ok(()),
            _ => Err(EngineError::new(
                ErrorCode::AuthenticationFailure,
                format!("authentication failed for user {:?}", credentials.username),
            )),
        }
    }

    fn live_clusters(&self) -> Vec<Arc<ClusterShared>> {
        let mut clusters = self.clusters.lock();
        clusters.retain(|weak| weak.strong_count() > 0);
        clusters.iter().filter_map(Weak::upgrade).collect()
    }

    fn statement_rows(&self, statement: &str) -> EngineResult<Vec<Value>> {
        if let Some(rows) = self.query_stubs.get(statement.trim()) {
            return Ok(rows.clone());
        }
        let select = query::parse_statement(statement)?;
        let bucket = self.bucket(&select.keyspace).map_err(|_| {
            EngineError::new(
                ErrorCode::KeyspaceNotFound,
                format!("keyspace not found: {}", select.keyspace),
            )
        })?;
        Ok(query::select_all(&bucket, &select))
    }

    /// Produce every row of a streaming request.
    pub(crate) fn stream(&self, kind: StreamKind) -> EngineResult<StreamOutput> {
        match kind {
            StreamKind::Query { statement, params } | StreamKind::Analytics { statement, params } => {
                let rows = self.statement_rows(&statement)?;
                let mut warnings = Vec::new();
                if !params.positional.is_empty() || !params.named.is_empty() {
                    warnings.push("statement parameters are ignored by the memory engine".to_string());
                }
                Ok(StreamOutput {
                    rows: rows
                        .iter()
                        .map(|row| StreamRow::Json(serde_json::to_vec(row).unwrap_or_default()))
                        .collect(),
                    total_rows: None,
                    client_context_id: params.client_context_id,
                    warnings,
                })
            }
            StreamKind::View {
                bucket,
                design_document,
                view_name,
                params,
            } => {
                let store = self.bucket(&bucket)?;
                let map = {
                    let views = self
                        .views
                        .get(&(bucket.clone(), design_document.clone()))
                        .ok_or_else(|| {
                            EngineError::new(
                                ErrorCode::DesignDocumentNotFound,
                                format!("design document not found: {}", design_document),
                            )
                        })?;
                    views.get(&view_name).cloned().ok_or_else(|| {
                        EngineError::new(
                            ErrorCode::ViewNotFound,
                            format!("view not found: {}/{}", design_document, view_name),
                        )
                    })?
                };
                let (rows, total) = query::run_view(&store, &map, &params);
                Ok(StreamOutput {
                    rows: rows
                        .into_iter()
                        .map(|row| StreamRow::View {
                            id: Some(row.id),
                            key: serde_json::to_vec(&row.key).unwrap_or_default(),
                            value: serde_json::to_vec(&row.value).unwrap_or_default(),
                        })
                        .collect(),
                    total_rows: Some(total),
                    client_context_id: None,
                    warnings: Vec::new(),
                })
            }
            StreamKind::GetAllReplicas { id } => {
                let store = self.bucket(&id.bucket)?;
                let doc = store.read(&id)?;
                let copies = 1 + self.num_replicas.load(Ordering::Relaxed);
                let rows = (0..copies)
                    .map(|i| StreamRow::Replica {
                        content: doc.content.clone(),
                        cas: doc.cas,
                        is_replica: i > 0,
                    })
                    .collect();
                Ok(StreamOutput {
                    rows,
                    total_rows: None,
                    client_context_id: None,
                    warnings: Vec::new(),
                })
            }
        }
    }
}

fn remote(cluster: &ClusterShared, port: u16) -> String {
    let host = cluster
        .config
        .hosts
        .first()
        .map(|h| h.split(':').next().unwrap_or(h).to_string())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}:{}", host, port)
}

fn service_port(service: ServiceType) -> u16 {
    match service {
        ServiceType::KeyValue => 11210,
        ServiceType::Query => 8093,
        ServiceType::Analytics => 8095,
        ServiceType::Views => 8092,
    }
}

pub(crate) fn diagnostics_report(
    cluster: &ClusterShared,
    report_id: Option<String>,
) -> DiagnosticsReport {
    let state = match cluster.phase() {
        Phase::Open => EndpointState::Connected,
        Phase::Created => EndpointState::Connecting,
        Phase::Closed => EndpointState::Disconnected,
    };
    let mut endpoints: Vec<EndpointDiagnostics> = cluster
        .open_buckets()
        .into_iter()
        .map(|bucket| EndpointDiagnostics {
            service: ServiceType::KeyValue,
            remote: remote(cluster, service_port(ServiceType::KeyValue)),
            state,
            bucket: Some(bucket),
        })
        .collect();
    endpoints.extend(
        [ServiceType::Query, ServiceType::Analytics, ServiceType::Views]
            .into_iter()
            .map(|service| EndpointDiagnostics {
                service,
                remote: remote(cluster, service_port(service)),
                state,
                bucket: None,
            }),
    );
    DiagnosticsReport {
        id: report_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        version: REPORT_VERSION,
        endpoints,
    }
}

pub(crate) fn ping_report(cluster: &ClusterShared, request: PingRequest) -> PingReport {
    let services = if request.services.is_empty() {
        ServiceType::ALL.to_vec()
    } else {
        request.services
    };
    let services = services
        .into_iter()
        .map(|service| {
            let started = Instant::now();
            let state = if service == ServiceType::KeyValue && cluster.open_buckets().is_empty() {
                PingState::Error
            } else {
                PingState::Ok
            };
            EndpointPing {
                service,
                remote: remote(cluster, service_port(service)),
                latency: started.elapsed(),
                state,
            }
        })
        .collect();
    PingReport {
        id: request
            .report_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        version: REPORT_VERSION,
        services,
    }
}

/// Engine keeping every document in process memory.
///
/// Clones share the same server state.
#[derive(Clone)]
pub struct MemoryEngine {
    server: Arc<Server>,
}

impl MemoryEngine {
    /// Create an engine with no buckets and no users.
    pub fn new() -> Self {
        Self {
            server: Arc::new(Server::new()),
        }
    }

    /// Create a bucket. Creating an existing bucket is a no-op.
    pub fn create_bucket(&self, name: &str) {
        self.server
            .buckets
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Bucket::new(name)));
    }

    /// Require these credentials on open. With no users, any are accepted.
    pub fn add_user(&self, username: &str, password: &str) {
        self.server
            .users
            .insert(username.to_string(), password.to_string());
    }

    /// Number of replica copies returned by replica reads.
    pub fn set_num_replicas(&self, replicas: usize) {
        self.server.num_replicas.store(replicas, Ordering::Relaxed);
    }

    /// Rows delivered per engine callback for streaming requests.
    pub fn set_row_chunk_size(&self, rows: usize) {
        self.server.row_chunk_size.store(rows.max(1), Ordering::Relaxed);
    }

    /// Answer `statement` with fixed rows on the query and analytics services.
    pub fn stub_query(&self, statement: &str, rows: Vec<Value>) {
        self.server
            .query_stubs
            .insert(statement.trim().to_string(), rows);
    }

    /// Define a view in `bucket` under `design_document`.
    pub fn define_view<F>(&self, bucket: &str, design_document: &str, view: &str, map: F)
    where
        F: Fn(&str, &Value) -> Vec<(Value, Value)> + Send + Sync + 'static,
    {
        self.server
            .views
            .entry((bucket.to_string(), design_document.to_string()))
            .or_default()
            .insert(view.to_string(), Arc::new(map));
    }

    /// Park newly submitted requests until [`release`](MemoryEngine::release).
    pub fn hold(&self) {
        self.server.held.store(true, Ordering::SeqCst);
    }

    /// Stop parking and schedule every parked request.
    pub fn release(&self) {
        self.server.held.store(false, Ordering::SeqCst);
        for cluster in self.server.live_clusters() {
            cluster.release();
        }
    }

    /// Number of requests currently parked.
    pub fn held_operations(&self) -> usize {
        self.server
            .live_clusters()
            .iter()
            .map(|cluster| cluster.parked())
            .sum()
    }

    /// Number of live documents in `bucket`.
    pub fn document_count(&self, bucket: &str) -> usize {
        self.server.bucket(bucket).map(|b| b.len()).unwrap_or(0)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("buckets", &self.server.buckets.len())
            .field("held", &self.server.is_held())
            .finish()
    }
}

impl Engine for MemoryEngine {
    fn connect(&self, context: IoContext, config: ClusterConfig) -> EngineResult<Arc<dyn Cluster>> {
        if config.hosts.is_empty() {
            return Err(EngineError::new(
                ErrorCode::InvalidArgument,
                "no hosts to connect to",
            ));
        }
        let shared = Arc::new(ClusterShared::new(
            Arc::clone(&self.server),
            context,
            config,
        ));
        self.server.clusters.lock().push(Arc::downgrade(&shared));
        debug!(hosts = ?shared.config.hosts, "memory cluster created");
        Ok(Arc::new(MemoryCluster { shared }))
    }
}
