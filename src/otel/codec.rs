//! Body encodings accepted and produced by the HTTP surface

use prost::Message;

use super::{model, proto, WireError};
use crate::data;

pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const PROTOBUF_CONTENT_TYPE: &str = "application/x-protobuf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireFormat {
    #[default]
    Json,
    Protobuf,
}

impl WireFormat {
    /// Format of a request body. A missing content type means JSON.
    pub fn from_content_type(content_type: Option<&str>) -> Result<Self, WireError> {
        let Some(raw) = content_type else {
            return Ok(WireFormat::Json);
        };
        let media_type = raw
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match media_type.as_str() {
            "" | "application/json" => Ok(WireFormat::Json),
            "application/x-protobuf" | "application/protobuf" => Ok(WireFormat::Protobuf),
            _ => Err(WireError::UnsupportedMediaType(raw.to_string())),
        }
    }

    /// Format for a response; JSON unless the client asked for protobuf
    pub fn from_accept(accept: Option<&str>) -> Self {
        match accept {
            Some(accept) if accept.to_ascii_lowercase().contains("protobuf") => {
                WireFormat::Protobuf
            }
            _ => WireFormat::Json,
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            WireFormat::Json => JSON_CONTENT_TYPE,
            WireFormat::Protobuf => PROTOBUF_CONTENT_TYPE,
        }
    }

    pub fn decode_trace(&self, body: &[u8]) -> Result<model::CreateTrace, WireError> {
        match self {
            WireFormat::Json => Ok(serde_json::from_slice(body)?),
            WireFormat::Protobuf => model::Trace::try_from(proto::Trace::decode(body)?),
        }
    }

    pub fn encode_trace(&self, trace: &data::Trace) -> Result<Vec<u8>, WireError> {
        let wire = model::Trace::try_from(trace)?;
        match self {
            WireFormat::Json => Ok(serde_json::to_vec(&wire)?),
            WireFormat::Protobuf => Ok(proto::Trace::from(&wire).encode_to_vec()),
        }
    }
}
