//! Replica reads.

use std::sync::Arc;

use crate::callback::{Callbacks, Pending};
use crate::connection::Connection;
use crate::convert::{self, effective_timeout};
use crate::dispatch::Call;
use crate::options::ReadOptions;
use crate::results::{GetReplicaResult, ReplicaStream};
use tether_core::Result;
use tether_engine::{Operation, Response, StreamKind, StreamRequest};

impl Connection {
    fn get_any_replica_call(
        &self,
        key: &str,
        options: ReadOptions,
    ) -> Result<Call<Response, GetReplicaResult>> {
        Ok(self
            .kv_call(
                key,
                Operation::GetAnyReplica,
                options.timeout,
                convert::replica_result,
            )?
            .transcoder(options.transcoder))
    }

    /// Read whichever copy of a document answers first, active or replica.
    pub fn get_any_replica(&self, key: &str, options: ReadOptions) -> Result<GetReplicaResult> {
        self.blocking(self.get_any_replica_call(key, options)?)
    }

    /// [`get_any_replica`](Connection::get_any_replica) with callbacks.
    pub fn get_any_replica_with(
        &self,
        key: &str,
        options: ReadOptions,
        callbacks: Callbacks<GetReplicaResult>,
    ) -> Result<Pending> {
        self.with_callbacks(self.get_any_replica_call(key, options)?, callbacks)
    }

    /// Read the active copy and every replica of a document.
    ///
    /// Copies are yielded as they arrive; the active copy is the one with
    /// `is_replica == false`.
    pub fn get_all_replicas(&self, key: &str, options: ReadOptions) -> Result<ReplicaStream> {
        let id = self.document_id(key)?;
        let transcoder = options
            .transcoder
            .unwrap_or_else(|| Arc::clone(&self.inner.transcoder));
        let request = StreamRequest::new(StreamKind::GetAllReplicas { id })
            .with_timeout(effective_timeout(options.timeout, self.options().kv_timeout()));
        self.stream(
            request,
            move |row| convert::replica_row(row, &*transcoder),
            |_| Ok(()),
        )
    }
}
