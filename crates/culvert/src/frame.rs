//! # Protocol Frames
//!
//! The two messages peers exchange. Payloads inside a frame are opaque bytes produced
//! by the serialisation gate; the frame itself is JSON.
//!
//! ## Invariants
//! - A `Callback` carries a result, a fault, or neither (void success). Never both.
//! - Decoding never panics on unknown data.

use serde::Deserialize;
use serde::Serialize;

use crate::ids::CorrelationId;

#[derive(Debug)]
pub enum Error {
    Json(serde_json::Error),
    Malformed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "frame encoding: {}", e),
            Self::Malformed(msg) => write!(f, "malformed frame: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum Frame {
    Invoke(Invoke),
    Callback(Callback),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoke {
    pub correlation_id: CorrelationId,
    pub service: String,
    pub method: String,
    pub parameter_types: Vec<String>,
    pub arguments: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Callback {
    pub correlation_id: CorrelationId,
    pub result: Option<Vec<u8>>,
    pub fault: Option<Vec<u8>>,
}

impl Callback {
    pub fn void(correlation_id: CorrelationId) -> Self {
        Self { correlation_id, result: None, fault: None }
    }

    pub fn value(correlation_id: CorrelationId, result: Vec<u8>) -> Self {
        Self { correlation_id, result: Some(result), fault: None }
    }

    pub fn fault(correlation_id: CorrelationId, fault: Vec<u8>) -> Self {
        Self { correlation_id, result: None, fault: Some(fault) }
    }
}

impl Frame {
    pub fn correlation_id(&self) -> CorrelationId {
        match self {
            Self::Invoke(invoke) => invoke.correlation_id,
            Self::Callback(callback) => callback.correlation_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let frame: Self = serde_json::from_slice(bytes)?;
        frame.validate()?;
        Ok(frame)
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Callback(Callback { result: Some(_), fault: Some(_), correlation_id }) => Err(Error::Malformed(
                format!("callback {} carries both a result and a fault", correlation_id),
            )),
            Self::Invoke(invoke) if invoke.parameter_types.len() != invoke.arguments.len() => {
                Err(Error::Malformed(format!(
                    "invoke {} has {} parameter types for {} arguments",
                    invoke.correlation_id,
                    invoke.parameter_types.len(),
                    invoke.arguments.len()
                )))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_survives_the_wire() {
        let frame = Frame::Invoke(Invoke {
            correlation_id: CorrelationId::new(),
            service: "Greeter, demo, Version=0.1.0, Culture=neutral, PublicKeyToken=null".into(),
            method: "greet".into(),
            parameter_types: vec!["String, std, Version=1.0.0.0, Culture=neutral, PublicKeyToken=null".into()],
            arguments: vec![b"{}".to_vec()],
        });
        let bytes = frame.encode().expect("encode");
        assert_eq!(Frame::decode(&bytes).expect("decode"), frame);

        let text = String::from_utf8(bytes).expect("utf8");
        assert!(text.contains("\"message\":\"Invoke\""));
        assert!(text.contains("\"correlationId\""));
    }

    #[test]
    fn test_callback_with_both_payloads_is_malformed() {
        let frame = Frame::Callback(Callback {
            correlation_id: CorrelationId::new(),
            result: Some(vec![1]),
            fault: Some(vec![2]),
        });
        assert!(matches!(frame.encode(), Err(Error::Malformed(_))));

        let raw = serde_json::to_vec(&frame).expect("raw encode");
        assert!(matches!(Frame::decode(&raw), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_garbage_is_an_error() {
        assert!(matches!(Frame::decode(b"\x00\x01"), Err(Error::Json(_))));
        assert!(matches!(Frame::decode(br#"{"message":"Shout"}"#), Err(Error::Json(_))));
    }
}
