//! Host Scenario Tests
//!
//! End-to-end scenarios for a host runtime driving Tether from threads that
//! share one global lock:
//! - host_lock: blocking calls, callbacks and streams under the host lock
//! - shutdown: close racing in-flight work and other closers
//! - config: options from a `tether.toml` file

mod common;

mod config;
mod host_lock;
mod shutdown;
