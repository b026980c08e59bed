//! MCP JSON-RPC dispatch.
//!
//! The gateway does not interpret protocol messages itself. Each session
//! gets its own [`Dispatcher`] from a [`DispatcherFactory`]; the dispatcher
//! decides what to emit for each inbound message.
//!
//! [`McpHandler`] is the built-in dispatcher. It speaks enough of MCP for a
//! client to connect, initialize and list tools; deployments that expose
//! real tools supply their own factory.

use async_trait::async_trait;
use relay_types::jsonrpc::{INVALID_PARAMS, METHOD_NOT_FOUND};
use relay_types::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use super::transport::SessionHandle;

/// MCP protocol version used by the SSE transport.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Result of dispatching one inbound message.
#[derive(Debug, Default)]
pub struct Dispatched {
    /// Returned as the body of the POST that submitted the message.
    pub direct: Option<JsonRpcMessage>,
    /// Sent on the session stream, in order, before the POST is answered.
    pub stream: Vec<JsonRpcMessage>,
}

impl Dispatched {
    /// Nothing to emit.
    pub fn none() -> Self {
        Self::default()
    }

    /// Emit one message on the session stream.
    pub fn on_stream(message: impl Into<JsonRpcMessage>) -> Self {
        Self {
            direct: None,
            stream: vec![message.into()],
        }
    }
}

/// Turns inbound protocol messages into outbound ones for one session.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// Handle one inbound message.
    async fn dispatch(&self, message: JsonRpcMessage) -> anyhow::Result<Dispatched>;

    /// Called once when the session's stream closes.
    fn on_close(&self) {}
}

/// Creates a fresh dispatcher for each new session.
pub trait DispatcherFactory: Send + Sync {
    fn create(&self, session: SessionHandle) -> Arc<dyn Dispatcher>;
}

/// Factory for the built-in [`McpHandler`].
#[derive(Debug, Clone)]
pub struct McpHandlerFactory {
    server_name: String,
}

impl McpHandlerFactory {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }
}

impl Default for McpHandlerFactory {
    fn default() -> Self {
        Self::new("relay")
    }
}

impl DispatcherFactory for McpHandlerFactory {
    fn create(&self, session: SessionHandle) -> Arc<dyn Dispatcher> {
        Arc::new(McpHandler {
            server_name: self.server_name.clone(),
            session,
            initialized: AtomicBool::new(false),
        })
    }
}

/// Built-in MCP request handler, one per session.
pub struct McpHandler {
    server_name: String,
    session: SessionHandle,
    initialized: AtomicBool,
}

impl McpHandler {
    /// Whether the client has completed the initialize handshake.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone();
        debug!(
            "MCP[{}]: Handling method: {}",
            self.session.session_id(),
            request.method
        );

        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(id)),
            "notifications/initialized" | "initialized" => {
                self.initialized.store(true, Ordering::SeqCst);
                info!("MCP session {} initialized", self.session.session_id());
                None
            }
            "ping" => Some(JsonRpcResponse::success(id, json!({}))),
            "tools/list" => Some(JsonRpcResponse::success(id, json!({ "tools": [] }))),
            "tools/call" => {
                let name = request
                    .params
                    .as_ref()
                    .and_then(|p| p.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Some(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    format!("Unknown tool: {}", name),
                ))
            }
            // Any other notification is acknowledged silently
            _ if request.is_notification() => None,
            _ => Some(JsonRpcResponse::error(
                id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            )),
        }
    }

    fn handle_initialize(&self, id: Option<Value>) -> JsonRpcResponse {
        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {
                    "tools": {}
                },
                "serverInfo": {
                    "name": self.server_name,
                    "version": env!("CARGO_PKG_VERSION")
                }
            }),
        )
    }
}

#[async_trait]
impl Dispatcher for McpHandler {
    async fn dispatch(&self, message: JsonRpcMessage) -> anyhow::Result<Dispatched> {
        match message {
            JsonRpcMessage::Request(request) => Ok(self
                .handle_request(request)
                .map(Dispatched::on_stream)
                .unwrap_or_default()),
            JsonRpcMessage::Response(response) => {
                // We never issue server-to-client requests
                debug!(
                    "MCP[{}]: Ignoring client response {:?}",
                    self.session.session_id(),
                    response.id
                );
                Ok(Dispatched::none())
            }
        }
    }

    fn on_close(&self) {
        debug!("MCP[{}]: Dispatcher closed", self.session.session_id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::NoopAuditSink;
    use crate::mcp::{SessionRegistry, SseTransport};

    async fn dispatch(value: Value) -> Dispatched {
        let (transport, _stream) = SseTransport::open(
            "t".to_string(),
            "/message",
            SessionRegistry::new(),
            &McpHandlerFactory::default(),
            Arc::new(NoopAuditSink),
        );
        let handler = McpHandlerFactory::default().create(SessionHandle::for_transport(&transport));
        handler
            .dispatch(serde_json::from_value(value).unwrap())
            .await
            .unwrap()
    }

    fn single_response(dispatched: Dispatched) -> JsonRpcResponse {
        assert!(dispatched.direct.is_none());
        assert_eq!(dispatched.stream.len(), 1);
        match dispatched.stream.into_iter().next().unwrap() {
            JsonRpcMessage::Response(r) => r,
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_initialize_reports_server_info() {
        let response = single_response(
            dispatch(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
                .await,
        );
        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "relay");
    }

    #[tokio::test]
    async fn test_tools_list_is_empty() {
        let request = json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"});
        let response = single_response(dispatch(request).await);
        assert_eq!(response.result.unwrap()["tools"], json!([]));
    }

    #[tokio::test]
    async fn test_unknown_method_is_not_found() {
        let response =
            single_response(dispatch(json!({"jsonrpc": "2.0", "id": 3, "method": "nope"})).await);
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_notifications_emit_nothing() {
        let dispatched =
            dispatch(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).await;
        assert!(dispatched.direct.is_none());
        assert!(dispatched.stream.is_empty());

        let dispatched = dispatch(json!({"jsonrpc": "2.0", "id": 9, "result": {}})).await;
        assert!(dispatched.stream.is_empty());
    }
}
