//! Core synchronization primitives for Tether
//!
//! This crate holds the pieces that reconcile an engine completing requests
//! on a pool of I/O threads with a caller that wants to block or iterate:
//! - [`completion_barrier`]: one-shot handoff from one completion to one waiter
//! - [`row_queue`]: ordered producer/consumer queue for streaming results
//! - [`MultiOp`] / [`MultiResult`]: keyed join over N independent operations
//! - [`Error`] / [`ErrorCode`]: the error taxonomy shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod barrier;
pub mod error;
pub mod multi;
pub mod row_queue;

pub use barrier::{completion_barrier, Completer, Waiter};
pub use error::{Error, ErrorCode, ErrorContext, Result};
pub use multi::{MultiOp, MultiResult};
pub use row_queue::{row_queue, AbortHandle, RowSender, RowStream, Streamed};
