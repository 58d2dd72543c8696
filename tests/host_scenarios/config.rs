//! Config File Scenarios

use crate::common::*;
use serde_json::json;
use tempfile::TempDir;
use tether::{ConnectOptions, Error, ReadOptions, StoreOptions, TranscoderKind, CONFIG_FILE_NAME};

#[test]
fn options_from_file_with_connection_string_overrides() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(
        &path,
        "num_io_threads = 2\nkv_timeout_ms = 1000\nrow_queue_capacity = 16\n",
    )
    .unwrap();

    let options = ConnectOptions::from_file(&path).unwrap();
    assert_eq!(options.num_io_threads, 2);
    assert_eq!(options.query_timeout_ms, tether::DEFAULT_QUERY_TIMEOUT_MS);

    let engine = create_engine();
    let conn = open(&engine, "couchbase://127.0.0.1/travel?kv_timeout=250", options);
    assert_eq!(conn.options().kv_timeout_ms, 250);
    assert_eq!(conn.options().num_io_threads, 2);
    assert_eq!(conn.options().row_queue_capacity, Some(16));

    conn.upsert("k", json!({"ok": true}), StoreOptions::default())
        .unwrap();
    assert!(conn.get("k", ReadOptions::default()).is_ok());
}

#[test]
fn written_options_read_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    let options = ConnectOptions {
        transcoder: TranscoderKind::RawBinary,
        tracing_threshold_ms: Some(5),
        ..ConnectOptions::default()
    };
    options.write_to_file(&path).unwrap();
    assert_eq!(ConnectOptions::from_file(&path).unwrap(), options);
}

#[test]
fn invalid_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join(CONFIG_FILE_NAME);
    std::fs::write(&path, "num_io_threads = 0\n").unwrap();
    assert!(matches!(
        ConnectOptions::from_file(&path),
        Err(Error::Config { .. })
    ));
    assert!(matches!(
        ConnectOptions::from_file(&dir.path().join("missing.toml")),
        Err(Error::Config { .. })
    ));
}
