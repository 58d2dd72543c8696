//! Query, analytics and view requests.
//!
//! Rows are pushed onto a row queue by I/O threads as the engine delivers
//! them and pulled by the caller through the returned stream. Iteration
//! yields `Ok(row)` per row, then at most one `Err` for a terminal error;
//! metadata is available from the stream once every row was read.

use uuid::Uuid;

use crate::connection::Connection;
use crate::convert::{self, effective_timeout};
use crate::options::{QueryOptions, ViewOptions};
use crate::results::{AnalyticsResult, QueryResult, ViewResult};
use tether_core::{Error, Result};
use tether_engine::{StatementParams, StreamKind, StreamRequest, ViewParams};

/// Without a caller-chosen client context id a random one is sent, so
/// every statement can be correlated in the metadata.
fn statement_params(options: QueryOptions, bucket: Option<String>) -> StatementParams {
    let client_context_id = options
        .client_context_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    StatementParams {
        positional: options.positional,
        named: options.named,
        client_context_id: Some(client_context_id),
        bucket,
    }
}

fn check_statement(statement: &str) -> Result<()> {
    if statement.trim().is_empty() {
        return Err(Error::invalid_argument("statement must not be empty"));
    }
    Ok(())
}

impl Connection {
    /// Run a query statement.
    pub fn query(&self, statement: &str, options: QueryOptions) -> Result<QueryResult> {
        check_statement(statement)?;
        let timeout = effective_timeout(options.timeout, self.options().query_timeout());
        let kind = StreamKind::Query {
            statement: statement.to_string(),
            params: statement_params(options, self.bucket()),
        };
        self.stream(
            StreamRequest::new(kind).with_timeout(timeout),
            convert::json_row,
            convert::query_meta,
        )
    }

    /// Run an analytics statement.
    pub fn analytics_query(&self, statement: &str, options: QueryOptions) -> Result<AnalyticsResult> {
        check_statement(statement)?;
        let timeout = effective_timeout(options.timeout, self.options().analytics_timeout());
        let kind = StreamKind::Analytics {
            statement: statement.to_string(),
            params: statement_params(options, None),
        };
        self.stream(
            StreamRequest::new(kind).with_timeout(timeout),
            convert::json_row,
            convert::query_meta,
        )
    }

    /// Query a view of the default bucket.
    pub fn view_query(
        &self,
        design_document: &str,
        view_name: &str,
        options: ViewOptions,
    ) -> Result<ViewResult> {
        if design_document.is_empty() || view_name.is_empty() {
            return Err(Error::invalid_argument(
                "design document and view name must not be empty",
            ));
        }
        let bucket = match self.bucket() {
            Some(bucket) => bucket,
            None => {
                self.runtime()?;
                return Err(Error::invalid_argument(
                    "no bucket is open; call open_bucket first",
                ));
            }
        };
        let timeout = effective_timeout(options.timeout, self.options().view_timeout());
        let kind = StreamKind::View {
            bucket,
            design_document: design_document.to_string(),
            view_name: view_name.to_string(),
            params: ViewParams {
                limit: options.limit,
                skip: options.skip,
                descending: options.descending,
            },
        };
        self.stream(
            StreamRequest::new(kind).with_timeout(timeout),
            convert::view_row,
            convert::view_meta,
        )
    }
}
