//! JSON-RPC 2.0 wire types.
//!
//! Messages carried over a session stream and posted to `/message` are
//! JSON-RPC 2.0 objects. The gateway only needs to tell requests from
//! responses and to render its own error envelope; the meaning of each
//! method belongs to the dispatcher.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Protocol version marker carried by every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Invalid JSON was received.
pub const PARSE_ERROR: i32 = -32700;
/// The JSON sent is not a valid request object.
pub const INVALID_REQUEST: i32 = -32600;
/// The method does not exist or is not available.
pub const METHOD_NOT_FOUND: i32 = -32601;
/// Invalid method parameters.
pub const INVALID_PARAMS: i32 = -32602;
/// Internal JSON-RPC error.
pub const INTERNAL_ERROR: i32 = -32603;
/// Implementation-defined server error, used for caller mistakes.
pub const SERVER_ERROR: i32 = -32000;

/// JSON-RPC 2.0 Request. A request without `id` is a notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: Option<Value>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// Whether this request expects no response.
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// JSON-RPC 2.0 Response.
///
/// `id` is always serialized, as `null` when unknown. A present `result` of
/// `null` is kept as `Some(Value::Null)` so it can be told apart from a
/// missing one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Create a success response.
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Whether the response carries exactly one of `result` and `error`.
    pub fn is_well_formed(&self) -> bool {
        self.result.is_some() != self.error.is_some()
    }
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

/// JSON-RPC 2.0 Error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub data: Option<Value>,
}

/// Any message that may travel over a session.
///
/// Requests are tried first since they are the only variant with a required
/// `method` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
}

impl JsonRpcMessage {
    /// The protocol version marker the message claims.
    pub fn version(&self) -> &str {
        match self {
            JsonRpcMessage::Request(r) => &r.jsonrpc,
            JsonRpcMessage::Response(r) => &r.jsonrpc,
        }
    }

    /// The message id, if any.
    pub fn id(&self) -> Option<&Value> {
        match self {
            JsonRpcMessage::Request(r) => r.id.as_ref(),
            JsonRpcMessage::Response(r) => r.id.as_ref(),
        }
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

/// Error body returned by the gateway for failed HTTP requests.
///
/// Unlike [`JsonRpcResponse`], `id` is always present and serialized as
/// `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorEnvelope {
    pub jsonrpc: String,
    pub error: JsonRpcError,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub id: Option<Value>,
}

impl ErrorEnvelope {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            error: JsonRpcError {
                code,
                message: message.into(),
                data: None,
            },
            id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_envelope_serializes_null_id() {
        let envelope = ErrorEnvelope::new(INTERNAL_ERROR, "Internal server error");
        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(
            value,
            json!({
                "jsonrpc": "2.0",
                "error": { "code": -32603, "message": "Internal server error" },
                "id": null
            })
        );
    }

    #[test]
    fn test_message_parses_request_and_notification() {
        let msg: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        match msg {
            JsonRpcMessage::Request(ref r) => {
                assert_eq!(r.method, "ping");
                assert!(!r.is_notification());
            }
            _ => panic!("expected request"),
        }

        let msg: JsonRpcMessage = serde_json::from_value(
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
        )
        .unwrap();
        assert!(matches!(msg, JsonRpcMessage::Request(ref r) if r.is_notification()));
    }

    #[test]
    fn test_message_parses_response() {
        let msg: JsonRpcMessage =
            serde_json::from_value(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert!(matches!(msg, JsonRpcMessage::Response(_)));
        assert_eq!(msg.id(), Some(&json!("a")));
    }

    #[test]
    fn test_response_requires_result_or_error() {
        fn parse(value: Value) -> JsonRpcResponse {
            match serde_json::from_value(value).unwrap() {
                JsonRpcMessage::Response(r) => r,
                other => panic!("expected response, got {:?}", other),
            }
        }

        assert!(!parse(json!({"jsonrpc": "2.0"})).is_well_formed());
        assert!(!parse(json!({"jsonrpc": "2.0", "id": 1, "foo": 3})).is_well_formed());
        assert!(!parse(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": {},
            "error": {"code": -1, "message": "x"}
        }))
        .is_well_formed());

        assert!(parse(json!({"jsonrpc": "2.0", "id": 1, "result": null})).is_well_formed());
        assert!(parse(json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -1, "message": "x"}}))
            .is_well_formed());
    }

    #[test]
    fn test_response_always_carries_id() {
        let response = JsonRpcResponse::success(None, json!({}));
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","id":null,"result":{}}"#);
    }

    #[test]
    fn test_notification_omits_id() {
        let request = JsonRpcRequest::new(None, "notifications/progress", None);
        let json = serde_json::to_string(&request).unwrap();
        assert_eq!(json, r#"{"jsonrpc":"2.0","method":"notifications/progress"}"#);
    }
}
