//! Typed entry points on [`Connection`], one module per operation family.
//!
//! | Module | Operations |
//! |--------|------------|
//! | `kv` | get, get_and_touch, exists, upsert, insert, replace, remove, touch |
//! | `counter` | increment, decrement, append, prepend |
//! | `subdoc` | lookup_in, mutate_in |
//! | `replica` | get_any_replica, get_all_replicas |
//! | `query` | query, analytics_query, view_query |
//! | `diagnostics` | diagnostics, ping |
//! | `multi` | get_multi, upsert_multi, remove_multi, touch_multi, exists_multi |
//!
//! Every single-document operation comes in a blocking form returning
//! `Result<T>` and a `_with` form taking [`Callbacks`](crate::Callbacks) and
//! returning `Result<Pending>`. Arguments are validated before anything is
//! dispatched; invalid arguments are returned synchronously by both forms.

mod counter;
mod diagnostics;
mod kv;
mod multi;
mod query;
mod replica;
mod subdoc;

pub use subdoc::{LookupInSpec, MutateInSpec, MAX_SUBDOC_SPECS};

use std::sync::Arc;
use std::time::Duration;

use crate::codec::{Content, Transcoder};
use crate::connection::Connection;
use crate::convert::effective_timeout;
use crate::dispatch::Call;
use tether_core::Result;
use tether_engine::{Cluster, Operation, RawDocument, Request, Response};

type Builder<T> = fn(Response, &dyn Transcoder) -> Result<T>;

impl Connection {
    /// Describe a single-document operation on `key` in the default bucket.
    pub(crate) fn kv_call<T: Send + 'static>(
        &self,
        key: &str,
        op: Operation,
        timeout: Option<Duration>,
        build: Builder<T>,
    ) -> Result<Call<Response, T>> {
        let id = self.document_id(key)?;
        let name = op.name();
        let request =
            Request::new(id, op).with_timeout(effective_timeout(timeout, self.options().kv_timeout()));
        Ok(Call::new(
            name,
            move |cluster: &dyn Cluster, handler| cluster.execute(request, handler),
            build,
        )
        .key(key))
    }

    /// Encode `content` with `transcoder`, or the connection's transcoder.
    pub(crate) fn encode(
        &self,
        content: &Content,
        transcoder: Option<&Arc<dyn Transcoder>>,
    ) -> Result<RawDocument> {
        match transcoder {
            Some(transcoder) => transcoder.encode(content),
            None => self.inner.transcoder.encode(content),
        }
    }
}
