//! Byte identifiers for traces and spans
//!
//! Span and trace identifiers are raw bytes on the protobuf wire. Everywhere a
//! string is needed (JSON bodies, URL paths, `TraceInfo.trace_id`) they are
//! rendered as lowercase hex, the same convention OTLP/JSON uses.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Opaque identifier carried as bytes, rendered as lowercase hex
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HexId(Vec<u8>);

/// Identifier of a span within its trace
pub type SpanId = HexId;

/// Trace identifier as carried by spans and links
pub type OtelTraceId = HexId;

impl HexId {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn from_hex(hex_id: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(hex_id).map(Self)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this id names the same trace as a `TraceInfo.trace_id` string
    pub fn matches_trace_key(&self, trace_id: &str) -> bool {
        self.to_hex().eq_ignore_ascii_case(trace_id)
    }
}

/// Store key form of a trace id string: trimmed lowercase hex, or `None` when
/// the string is empty or not hex
pub fn canonical_trace_id(trace_id: &str) -> Option<String> {
    HexId::from_hex(trace_id.trim())
        .ok()
        .filter(|id| !id.is_empty())
        .map(|id| id.to_hex())
}

impl fmt::Display for HexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<Vec<u8>> for HexId {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for HexId {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl Serialize for HexId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for HexId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let hex_id = String::deserialize(deserializer)?;
        HexId::from_hex(&hex_id).map_err(|error| {
            de::Error::custom(format!("failed to decode hex identifier '{hex_id}': {error}"))
        })
    }
}
