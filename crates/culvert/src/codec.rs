//! # Payload Codec
//!
//! The byte-level contract the serialisation gate is layered on. A codec only
//! knows how to move a [`Tagged`] value to and from bytes; it never decides
//! which types are allowed.

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug)]
pub enum Error {
    Encode(String),
    Decode(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Encode(msg) => write!(f, "encode failed: {}", msg),
            Self::Decode(msg) => write!(f, "decode failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// A payload with its qualified type identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged {
    #[serde(rename = "$type")]
    pub type_name: String,
    pub value: serde_json::Value,
}

/// Object-safe byte codec (`Arc<dyn Codec>`).
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, tagged: &Tagged) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<Tagged>;
}

/// `{"$type": "...", "value": ...}` as UTF-8 JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, tagged: &Tagged) -> Result<Vec<u8>> {
        serde_json::to_vec(tagged).map_err(|e| Error::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Tagged> {
        serde_json::from_slice(bytes).map_err(|e| Error::Decode(e.to_string()))
    }
}
