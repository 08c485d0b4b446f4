//! JSON-RPC 2.0 envelope types for the wire profile.
//!
//! Exchanges in this space (Deribit among them) deviate from strict JSON-RPC
//! 2.0 in small ways — notifications carry a `method`/`params` pair without
//! an `id`, and servers sometimes omit `jsonrpc` on notifications. The types
//! here accept that in practice while still emitting a conformant envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

fn jsonrpc_version() -> String {
    "2.0".to_string()
}

/// An outbound JSON-RPC request or inbound echo of one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Correlates this request with its response.
    pub id: i64,
    /// The exchange method name, e.g. `public/auth`.
    pub method: String,
    /// Method-specific parameters, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// Builds a request envelope with the given id, method, and params.
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: jsonrpc_version(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Server-defined error code.
    pub code: i64,
    /// Human-readable error message.
    pub message: String,
    /// Optional additional error context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// An inbound JSON-RPC response correlated by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// Matches the `id` of the originating request.
    pub id: i64,
    /// Present on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Present on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

/// An inbound server-initiated notification (subscription data, heartbeats).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    /// Always `"2.0"`.
    #[serde(default = "jsonrpc_version")]
    pub jsonrpc: String,
    /// The channel or event method name.
    pub method: String,
    /// Notification payload, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_params_when_absent() {
        let req = JsonRpcRequest::new(1, "public/ping", None);
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("params").is_none());
        assert_eq!(value["id"], 1);
    }

    #[test]
    fn response_with_error_has_no_result() {
        let raw = r#"{"jsonrpc":"2.0","id":7,"error":{"code":10009,"message":"not_authenticated"}}"#;
        let resp: JsonRpcResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(resp.id, 7);
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, 10009);
    }

    #[test]
    fn notification_without_explicit_jsonrpc_field_still_parses() {
        let raw = r#"{"method":"heartbeat","params":{"type":"test_request"}}"#;
        let note: JsonRpcNotification = serde_json::from_str(raw).unwrap();
        assert_eq!(note.method, "heartbeat");
    }
}
