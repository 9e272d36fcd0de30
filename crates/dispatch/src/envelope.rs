//! Request and response envelopes.
//!
//! Envelopes are JSON regardless of the body format. The `arguments` and
//! `result` bodies are opaque bytes produced by the
//! [`SerializationEngine`](corelib::SerializationEngine) in the envelope's
//! `format`.

use corelib::codec::Format;
use corelib::context::CorrelationId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Free-form string headers carried with a request.
pub type Headers = BTreeMap<String, String>;

/// Header read by [`crate::RoleAuthorizer`] to identify the caller.
pub const PRINCIPAL_HEADER: &str = "principal";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<u8>>,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub format: Format,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: Headers,
}

impl RequestEnvelope {
    pub fn new(target: impl Into<String>, correlation_id: CorrelationId) -> Self {
        Self {
            target: target.into(),
            arguments: None,
            correlation_id,
            format: Format::default(),
            headers: Headers::new(),
        }
    }

    pub fn with_arguments(mut self, arguments: Vec<u8>) -> Self {
        self.arguments = Some(arguments);
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<u8>>,
    pub authorized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cancelled: bool,
    pub correlation_id: CorrelationId,
    #[serde(default)]
    pub format: Format,
}

impl ResponseEnvelope {
    fn for_request(request: &RequestEnvelope) -> Self {
        Self {
            result: None,
            authorized: true,
            error: None,
            cancelled: false,
            correlation_id: request.correlation_id.clone(),
            format: request.format,
        }
    }

    pub fn completed(request: &RequestEnvelope, result: Vec<u8>) -> Self {
        Self {
            result: Some(result),
            ..Self::for_request(request)
        }
    }

    /// Authorization refused; no result, the operation never ran.
    pub fn denied(request: &RequestEnvelope, reason: Option<String>) -> Self {
        Self {
            authorized: false,
            error: reason,
            ..Self::for_request(request)
        }
    }

    pub fn faulted(request: &RequestEnvelope, message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::for_request(request)
        }
    }

    pub fn cancelled(request: &RequestEnvelope) -> Self {
        Self {
            cancelled: true,
            ..Self::for_request(request)
        }
    }

    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> RequestEnvelope {
        RequestEnvelope::new("Order.save", CorrelationId::from("c-1"))
            .with_format(Format::Named)
            .with_header(PRINCIPAL_HEADER, "alice")
    }

    #[test]
    fn test_response_echoes_correlation_and_format() {
        let request = request();
        for response in [
            ResponseEnvelope::completed(&request, vec![1]),
            ResponseEnvelope::denied(&request, None),
            ResponseEnvelope::faulted(&request, "boom"),
            ResponseEnvelope::cancelled(&request),
        ] {
            assert_eq!(response.correlation_id.as_str(), "c-1");
            assert_eq!(response.format, Format::Named);
        }
    }

    #[test]
    fn test_denied_carries_no_result() {
        let response = ResponseEnvelope::denied(&request(), Some("nope".into()));
        assert!(!response.authorized);
        assert!(response.result.is_none());
        assert_eq!(response.error.as_deref(), Some("nope"));
    }

    #[test]
    fn test_json_field_names() {
        let json: serde_json::Value =
            serde_json::from_slice(&request().with_arguments(vec![7]).to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "target": "Order.save",
                "arguments": [7],
                "correlation_id": "c-1",
                "format": "named",
                "headers": {"principal": "alice"},
            })
        );
    }

    #[test]
    fn test_minimal_response_parses() {
        let response =
            ResponseEnvelope::from_json(br#"{"authorized": true, "correlation_id": "x"}"#).unwrap();
        assert_eq!(response.format, Format::Ordinal);
        assert!(!response.cancelled);
    }
}
