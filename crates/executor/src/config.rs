//! Connection configuration.
//!
//! Options come from three places, later ones winning:
//! 1. [`ConnectOptions::default`]
//! 2. a `tether.toml` file ([`ConnectOptions::from_file`])
//! 3. query parameters of the connection string
//!
//! Unknown connection-string parameters are logged and ignored.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::codec::TranscoderKind;
use tether_core::{Error, Result};

pub use tether_engine::Credentials;

/// Config file name conventionally used for connection options.
pub const CONFIG_FILE_NAME: &str = "tether.toml";

/// Default key-value timeout in milliseconds.
pub const DEFAULT_KV_TIMEOUT_MS: u64 = 2_500;
/// Default query timeout in milliseconds.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 75_000;
/// Default analytics timeout in milliseconds.
pub const DEFAULT_ANALYTICS_TIMEOUT_MS: u64 = 75_000;
/// Default view timeout in milliseconds.
pub const DEFAULT_VIEW_TIMEOUT_MS: u64 = 75_000;

fn default_io_threads() -> usize {
    1
}

fn default_kv_timeout_ms() -> u64 {
    DEFAULT_KV_TIMEOUT_MS
}

fn default_query_timeout_ms() -> u64 {
    DEFAULT_QUERY_TIMEOUT_MS
}

fn default_analytics_timeout_ms() -> u64 {
    DEFAULT_ANALYTICS_TIMEOUT_MS
}

fn default_view_timeout_ms() -> u64 {
    DEFAULT_VIEW_TIMEOUT_MS
}

/// Connection options loaded from `tether.toml`.
///
/// # Example
///
/// ```toml
/// num_io_threads = 2
/// kv_timeout_ms = 2500
/// row_queue_capacity = 1024
/// tracing_threshold_ms = 500
/// transcoder = "json"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectOptions {
    /// Number of I/O threads driving the engine.
    #[serde(default = "default_io_threads")]
    pub num_io_threads: usize,
    /// Key-value operation timeout.
    #[serde(default = "default_kv_timeout_ms")]
    pub kv_timeout_ms: u64,
    /// Query timeout.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Analytics timeout.
    #[serde(default = "default_analytics_timeout_ms")]
    pub analytics_timeout_ms: u64,
    /// View timeout.
    #[serde(default = "default_view_timeout_ms")]
    pub view_timeout_ms: u64,
    /// Bound on undelivered rows per stream; unbounded when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_queue_capacity: Option<usize>,
    /// Log operations slower than this; tracing is off when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracing_threshold_ms: Option<u64>,
    /// Default transcoder.
    #[serde(default)]
    pub transcoder: TranscoderKind,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            num_io_threads: default_io_threads(),
            kv_timeout_ms: DEFAULT_KV_TIMEOUT_MS,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            analytics_timeout_ms: DEFAULT_ANALYTICS_TIMEOUT_MS,
            view_timeout_ms: DEFAULT_VIEW_TIMEOUT_MS,
            row_queue_capacity: None,
            tracing_threshold_ms: None,
            transcoder: TranscoderKind::Json,
        }
    }
}

fn parse_param<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| Error::Config {
        reason: format!("invalid value for '{}': {:?}", key, value),
    })
}

impl ConnectOptions {
    /// Parse options from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let options: ConnectOptions = toml::from_str(content).map_err(|e| Error::Config {
            reason: format!("failed to parse options: {}", e),
        })?;
        options.validate()?;
        Ok(options)
    }

    /// Read and parse options from a file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            reason: format!("failed to read config file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Config { reason } => Error::Config {
                reason: format!("{} ({})", reason, path.display()),
            },
            other => other,
        })
    }

    /// Serialize to TOML and write to `path`.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config {
            reason: format!("failed to serialize options: {}", e),
        })?;
        std::fs::write(path, content).map_err(|e| Error::Config {
            reason: format!("failed to write config file '{}': {}", path.display(), e),
        })
    }

    /// Reject values no connection can run with.
    pub fn validate(&self) -> Result<()> {
        if self.num_io_threads == 0 {
            return Err(Error::Config {
                reason: "num_io_threads must be at least 1".to_string(),
            });
        }
        if self.row_queue_capacity == Some(0) {
            return Err(Error::Config {
                reason: "row_queue_capacity must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Apply the recognised query parameters of a connection string.
    pub fn with_overrides(mut self, connection_string: &ConnectionString) -> Result<Self> {
        for (key, value) in &connection_string.params {
            match key.as_str() {
                "num_io_threads" => self.num_io_threads = parse_param(key, value)?,
                "kv_timeout" => self.kv_timeout_ms = parse_param(key, value)?,
                "query_timeout" => self.query_timeout_ms = parse_param(key, value)?,
                "analytics_timeout" => self.analytics_timeout_ms = parse_param(key, value)?,
                "view_timeout" => self.view_timeout_ms = parse_param(key, value)?,
                "row_queue_capacity" => self.row_queue_capacity = Some(parse_param(key, value)?),
                "tracing_threshold" => self.tracing_threshold_ms = Some(parse_param(key, value)?),
                "transcoder" => {
                    self.transcoder = match value.as_str() {
                        "json" => TranscoderKind::Json,
                        "raw_binary" => TranscoderKind::RawBinary,
                        _ => {
                            return Err(Error::Config {
                                reason: format!("unknown transcoder {:?}", value),
                            })
                        }
                    }
                }
                _ => warn!(param = %key, "ignoring unknown connection string parameter"),
            }
        }
        self.validate()?;
        Ok(self)
    }

    /// Key-value timeout.
    pub fn kv_timeout(&self) -> Duration {
        Duration::from_millis(self.kv_timeout_ms)
    }

    /// Query timeout.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Analytics timeout.
    pub fn analytics_timeout(&self) -> Duration {
        Duration::from_millis(self.analytics_timeout_ms)
    }

    /// View timeout.
    pub fn view_timeout(&self) -> Duration {
        Duration::from_millis(self.view_timeout_ms)
    }
}

/// One seed node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    /// Host name or address
    pub host: String,
    /// Port, when given
    pub port: Option<u16>,
}

impl HostAddress {
    /// Parse `host`, `host:port`, `[v6]` or `[v6]:port`.
    fn parse(spec: &str) -> std::result::Result<Self, &'static str> {
        let (host, port) = match spec.strip_prefix('[') {
            Some(bracketed) => {
                let (host, rest) = bracketed.split_once(']').ok_or("unclosed bracket")?;
                match rest {
                    "" => (host, None),
                    _ => (host, Some(rest.strip_prefix(':').ok_or("bad port")?)),
                }
            }
            None => match spec.rsplit_once(':') {
                Some((host, port)) => (host, Some(port)),
                None => (spec, None),
            },
        };
        let port = match port {
            Some(port) => Some(port.parse().map_err(|_| "bad port")?),
            None => None,
        };
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]", self.host)?;
        } else {
            f.write_str(&self.host)?;
        }
        match self.port {
            Some(port) => write!(f, ":{}", port),
            None => Ok(()),
        }
    }
}

/// Parsed `scheme://host[:port][,host[:port]...][/bucket][?key=value&...]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionString {
    /// Scheme, such as `couchbase`
    pub scheme: String,
    /// Seed nodes
    pub hosts: Vec<HostAddress>,
    /// Bucket to open once connected
    pub bucket: Option<String>,
    /// Query parameters in key order
    pub params: BTreeMap<String, String>,
}

impl ConnectionString {
    /// Parse a connection string.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::Config {
            reason: format!("invalid connection string {:?}: {}", input, reason),
        };

        let (scheme, rest) = input.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(invalid("bad scheme"));
        }

        let (rest, query) = match rest.split_once('?') {
            Some((rest, query)) => (rest, Some(query)),
            None => (rest, None),
        };
        let (hosts_part, bucket) = match rest.split_once('/') {
            Some((hosts, bucket)) if !bucket.is_empty() => (hosts, Some(bucket.to_string())),
            Some((hosts, _)) => (hosts, None),
            None => (rest, None),
        };

        let mut hosts = Vec::new();
        for spec in hosts_part.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let address = HostAddress::parse(spec).map_err(invalid)?;
            if address.host.is_empty() {
                return Err(invalid("empty host"));
            }
            hosts.push(address);
        }
        if hosts.is_empty() {
            return Err(invalid("no hosts"));
        }

        let mut params = BTreeMap::new();
        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| invalid("parameter without value"))?;
            params.insert(key.to_string(), value.to_string());
        }

        Ok(Self {
            scheme: scheme.to_string(),
            hosts,
            bucket,
            params,
        })
    }

    /// Seed nodes as `host[:port]` strings.
    pub fn host_strings(&self) -> Vec<String> {
        self.hosts.iter().map(ToString::to_string).collect()
    }
}

impl FromStr for ConnectionString {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
