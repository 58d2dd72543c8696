//! Document transcoders.
//!
//! A transcoder turns host values into the bytes and common flags stored by
//! the engine, and back. The top byte of the flags records the format:
//!
//! | Format | Flags |
//! |--------|-------|
//! | JSON | `0x02000006` |
//! | Binary | `0x03000008` |
//! | String | `0x04000000` |
//!
//! Flags of `0` (documents written by legacy clients, counters) are decoded
//! as JSON when they parse and as binary otherwise.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use tether_core::{Error, Result};
use tether_engine::RawDocument;

/// Common flags for JSON documents.
pub const JSON_FLAGS: u32 = 0x0200_0006;
/// Common flags for binary documents.
pub const BINARY_FLAGS: u32 = 0x0300_0008;
/// Common flags for UTF-8 string documents.
pub const STRING_FLAGS: u32 = 0x0400_0000;

const FORMAT_MASK: u32 = 0xFF00_0000;

/// Storage format recorded in the common flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// No format recorded
    Legacy,
    /// JSON
    Json,
    /// Opaque bytes
    Binary,
    /// UTF-8 text
    String,
    /// Unrecognized format byte
    Unknown(u8),
}

impl Format {
    /// Format encoded in `flags`.
    pub fn from_flags(flags: u32) -> Self {
        match (flags & FORMAT_MASK) >> 24 {
            0 => Format::Legacy,
            0x02 => Format::Json,
            0x03 => Format::Binary,
            0x04 => Format::String,
            other => Format::Unknown(other as u8),
        }
    }
}

/// A document body as seen by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Content {
    /// JSON value
    Json(serde_json::Value),
    /// Opaque bytes
    Binary(Vec<u8>),
    /// UTF-8 text
    Text(String),
}

impl Content {
    /// JSON content from any serializable value.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        serde_json::to_value(value)
            .map(Content::Json)
            .map_err(|e| Error::invalid_argument(format!("value is not serializable: {}", e)))
    }

    /// Deserialize JSON or text content into `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let value = match self {
            Content::Json(value) => value.clone(),
            Content::Text(text) => serde_json::Value::String(text.clone()),
            Content::Binary(_) => {
                return Err(Error::build_result("binary content cannot be deserialized"))
            }
        };
        serde_json::from_value(value).map_err(|e| Error::build_result(e.to_string()))
    }

    /// Borrow the JSON value, if this is JSON content.
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Borrow the bytes, if this is binary content.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Content::Binary(bytes) => Some(bytes),
            _ => None,
        }
    }
}

impl From<serde_json::Value> for Content {
    fn from(value: serde_json::Value) -> Self {
        Content::Json(value)
    }
}

impl From<Vec<u8>> for Content {
    fn from(bytes: Vec<u8>) -> Self {
        Content::Binary(bytes)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Text(text.to_string())
    }
}

/// Converts between host content and stored documents.
///
/// Encoding runs on the calling thread before dispatch, so encoding errors
/// are argument errors. Decoding runs on an I/O thread after the engine
/// answered, so decoding errors are result-building errors.
pub trait Transcoder: Send + Sync {
    /// Encode content for storage.
    fn encode(&self, content: &Content) -> Result<RawDocument>;

    /// Decode a stored document.
    fn decode(&self, document: &RawDocument) -> Result<Content>;
}

/// Default transcoder: JSON and text, with binary passed through on read.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonTranscoder;

impl Transcoder for JsonTranscoder {
    fn encode(&self, content: &Content) -> Result<RawDocument> {
        match content {
            Content::Json(value) => serde_json::to_vec(value)
                .map(|bytes| RawDocument::new(bytes, JSON_FLAGS))
                .map_err(|e| Error::invalid_argument(e.to_string())),
            Content::Text(text) => Ok(RawDocument::new(text.as_bytes().to_vec(), STRING_FLAGS)),
            Content::Binary(_) => Err(Error::invalid_argument(
                "binary content requires the raw binary transcoder",
            )),
        }
    }

    fn decode(&self, document: &RawDocument) -> Result<Content> {
        let bytes = &document.bytes;
        match Format::from_flags(document.flags) {
            Format::Json => serde_json::from_slice(bytes)
                .map(Content::Json)
                .map_err(|e| Error::build_result(format!("invalid JSON document: {}", e))),
            Format::String => String::from_utf8(bytes.clone())
                .map(Content::Text)
                .map_err(|e| Error::build_result(format!("invalid UTF-8 document: {}", e))),
            Format::Binary => Ok(Content::Binary(bytes.clone())),
            Format::Legacy => Ok(serde_json::from_slice(bytes)
                .map(Content::Json)
                .unwrap_or_else(|_| Content::Binary(bytes.clone()))),
            Format::Unknown(byte) => Err(Error::build_result(format!(
                "unknown document format 0x{:02x}",
                byte
            ))),
        }
    }
}

/// Transcoder for opaque bytes only.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBinaryTranscoder;

impl Transcoder for RawBinaryTranscoder {
    fn encode(&self, content: &Content) -> Result<RawDocument> {
        match content {
            Content::Binary(bytes) => Ok(RawDocument::new(bytes.clone(), BINARY_FLAGS)),
            _ => Err(Error::invalid_argument(
                "raw binary transcoder only encodes binary content",
            )),
        }
    }

    fn decode(&self, document: &RawDocument) -> Result<Content> {
        match Format::from_flags(document.flags) {
            Format::Binary | Format::Legacy => Ok(Content::Binary(document.bytes.clone())),
            other => Err(Error::build_result(format!(
                "raw binary transcoder cannot decode {:?} documents",
                other
            ))),
        }
    }
}

/// Transcoder selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscoderKind {
    /// [`JsonTranscoder`]
    #[default]
    Json,
    /// [`RawBinaryTranscoder`]
    RawBinary,
}

impl TranscoderKind {
    /// Instantiate the transcoder.
    pub fn build(self) -> std::sync::Arc<dyn Transcoder> {
        match self {
            TranscoderKind::Json => std::sync::Arc::new(JsonTranscoder),
            TranscoderKind::RawBinary => std::sync::Arc::new(RawBinaryTranscoder),
        }
    }
}

impl fmt::Display for TranscoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscoderKind::Json => f.write_str("json"),
            TranscoderKind::RawBinary => f.write_str("raw_binary"),
        }
    }
}
