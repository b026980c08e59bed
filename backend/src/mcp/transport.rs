//! SSE transport for a single MCP session.
//!
//! Each transport owns the sending half of one Server-Sent Events stream.
//! Outbound messages are framed as `event: message` events; the first event
//! on a new stream is `event: endpoint`, carrying the URL the client must
//! POST its requests to.
//!
//! The receiving half is wrapped in a [`SessionStream`] that is handed to the
//! HTTP response. When the client disconnects the stream is dropped, which
//! closes the transport and removes it from the registry before anything
//! else can observe it.

use axum::response::sse::Event;
use futures::Stream;
use parking_lot::Mutex;
use relay_types::JsonRpcMessage;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use super::handler::{Dispatched, Dispatcher, DispatcherFactory};
use super::registry::SessionRegistry;
use crate::audit::AuditSink;

/// Number of frames buffered per session before `send` waits for the client.
const STREAM_BUFFER: usize = 100;

/// Errors returned by transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is not open")]
    NotOpen,
    #[error("Invalid message: {0}")]
    Malformed(String),
    #[error("Failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Dispatch failed: {0:#}")]
    Dispatch(anyhow::Error),
}

/// A single SSE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: &'static str,
    pub data: String,
}

impl Frame {
    fn endpoint(url: String) -> Self {
        Self {
            event: "endpoint",
            data: url,
        }
    }

    fn message(json: String) -> Self {
        Self {
            event: "message",
            data: json,
        }
    }

    fn into_event(self) -> Event {
        Event::default().event(self.event).data(self.data)
    }
}

/// Handle given to a session's dispatcher so it can push messages later.
///
/// Holds only a weak reference; sending through a handle whose transport is
/// gone fails with [`TransportError::NotOpen`].
#[derive(Clone)]
pub struct SessionHandle {
    session_id: String,
    transport: Weak<SseTransport>,
}

impl SessionHandle {
    pub(crate) fn for_transport(transport: &Arc<SseTransport>) -> Self {
        Self {
            session_id: transport.session_id.clone(),
            transport: Arc::downgrade(transport),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Send a message on the session's stream.
    pub async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        match self.transport.upgrade() {
            Some(transport) => transport.send(message).await,
            None => Err(TransportError::NotOpen),
        }
    }

    /// Whether the session's stream is still open.
    pub fn is_open(&self) -> bool {
        self.transport
            .upgrade()
            .is_some_and(|transport| !transport.is_closed())
    }
}

/// Transport for one SSE session.
pub struct SseTransport {
    session_id: String,
    created_at: Instant,
    /// `None` once closed.
    sender: Mutex<Option<mpsc::Sender<Frame>>>,
    /// Serializes `send` calls so frames never interleave.
    send_lock: tokio::sync::Mutex<()>,
    dispatcher: Arc<dyn Dispatcher>,
    audit: Arc<dyn AuditSink>,
    registry: SessionRegistry,
}

impl SseTransport {
    /// Create a transport and the stream that feeds its HTTP response.
    ///
    /// The endpoint event is queued immediately. The transport is not
    /// registered; the caller does that once the ID is known to be free.
    pub fn open(
        session_id: String,
        message_path: &str,
        registry: SessionRegistry,
        dispatchers: &dyn DispatcherFactory,
        audit: Arc<dyn AuditSink>,
    ) -> (Arc<Self>, SessionStream) {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        let endpoint = format!("{}?sessionId={}", message_path, session_id);
        // Fresh channel with spare capacity, cannot fail.
        let _ = tx.try_send(Frame::endpoint(endpoint));

        let transport = Arc::new_cyclic(|weak: &Weak<SseTransport>| {
            let handle = SessionHandle {
                session_id: session_id.clone(),
                transport: weak.clone(),
            };
            SseTransport {
                dispatcher: dispatchers.create(handle),
                session_id,
                created_at: Instant::now(),
                sender: Mutex::new(Some(tx)),
                send_lock: tokio::sync::Mutex::new(()),
                audit,
                registry,
            }
        });

        let stream = SessionStream {
            frames: ReceiverStream::new(rx),
            transport: transport.clone(),
        };
        (transport, stream)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Get the session age in seconds.
    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Record and deliver one message on this session's stream.
    ///
    /// Concurrent calls are delivered in the order they acquire the send
    /// lock. An audit failure is logged and does not prevent delivery.
    pub async fn send(&self, message: JsonRpcMessage) -> Result<(), TransportError> {
        let _ordered = self.send_lock.lock().await;

        let sender = self.sender.lock().clone().ok_or(TransportError::NotOpen)?;

        if let Err(e) = self.audit.record(&self.session_id, &message).await {
            warn!(
                "Failed to record outgoing message for session {}: {:#}",
                self.session_id, e
            );
        }

        let json = serde_json::to_string(&message)?;
        let permit = sender
            .reserve()
            .await
            .map_err(|_| TransportError::NotOpen)?;

        // A close that raced with the wait above wins.
        let open = self.sender.lock();
        if open.is_none() {
            return Err(TransportError::NotOpen);
        }
        permit.send(Frame::message(json));
        drop(open);

        debug!("Sent SSE message to session {}", self.session_id);
        Ok(())
    }

    /// Parse a posted request body and hand it to this session's dispatcher.
    ///
    /// Messages the dispatcher wants on the stream are sent before this
    /// returns.
    pub async fn handle_inbound(&self, body: &[u8]) -> Result<Dispatched, TransportError> {
        if self.is_closed() {
            return Err(TransportError::NotOpen);
        }

        let message: JsonRpcMessage =
            serde_json::from_slice(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
        if message.version() != relay_types::jsonrpc::JSONRPC_VERSION {
            return Err(TransportError::Malformed(format!(
                "unsupported jsonrpc version '{}'",
                message.version()
            )));
        }
        if let JsonRpcMessage::Response(ref response) = message {
            if !response.is_well_formed() {
                return Err(TransportError::Malformed(
                    "response must carry exactly one of result or error".to_string(),
                ));
            }
        }

        let mut dispatched = self
            .dispatcher
            .dispatch(message)
            .await
            .map_err(TransportError::Dispatch)?;

        for outbound in std::mem::take(&mut dispatched.stream) {
            self.send(outbound).await?;
        }
        Ok(dispatched)
    }

    /// Close the stream and remove this transport from the registry.
    ///
    /// Only the first call has any effect.
    pub fn close(&self) {
        let Some(sender) = self.sender.lock().take() else {
            return;
        };
        drop(sender);

        self.registry.deregister_transport(self);
        self.dispatcher.on_close();
        info!(
            "Closed session {} after {}s",
            self.session_id,
            self.age_secs()
        );
    }
}

/// Event stream backing one session's SSE response.
///
/// Dropping it closes the transport.
pub struct SessionStream {
    frames: ReceiverStream<Frame>,
    transport: Arc<SseTransport>,
}

impl SessionStream {
    pub fn session_id(&self) -> &str {
        self.transport.session_id()
    }
}

impl Stream for SessionStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.frames)
            .poll_next(cx)
            .map(|frame| frame.map(|f| Ok(f.into_event())))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        self.transport.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audit::NoopAuditSink;
    use crate::mcp::handler::McpHandlerFactory;
    use async_trait::async_trait;
    use relay_types::{JsonRpcRequest, JsonRpcResponse};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_stream::StreamExt;

    pub(crate) fn open_test_transport(
        registry: &SessionRegistry,
        id: &str,
    ) -> (Arc<SseTransport>, SessionStream) {
        SseTransport::open(
            id.to_string(),
            "/message",
            registry.clone(),
            &McpHandlerFactory::default(),
            Arc::new(NoopAuditSink),
        )
    }

    async fn next_frame(stream: &mut SessionStream) -> Option<Frame> {
        stream.frames.next().await
    }

    fn notification(n: u64) -> JsonRpcMessage {
        JsonRpcRequest::new(None, "notifications/progress", Some(json!({ "n": n }))).into()
    }

    struct FailingAudit;

    #[async_trait]
    impl AuditSink for FailingAudit {
        async fn record(&self, _session_id: &str, _message: &JsonRpcMessage) -> anyhow::Result<()> {
            anyhow::bail!("dataset unavailable")
        }
    }

    struct CountingAudit(AtomicUsize);

    #[async_trait]
    impl AuditSink for CountingAudit {
        async fn record(&self, _session_id: &str, _message: &JsonRpcMessage) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_first_frame_announces_endpoint() {
        let registry = SessionRegistry::new();
        let (_transport, mut stream) = open_test_transport(&registry, "abc");

        let frame = next_frame(&mut stream).await.unwrap();
        assert_eq!(frame.event, "endpoint");
        assert_eq!(frame.data, "/message?sessionId=abc");
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = open_test_transport(&registry, "a");
        next_frame(&mut stream).await.unwrap();

        for n in 0..10 {
            transport.send(notification(n)).await.unwrap();
        }

        for n in 0..10 {
            let frame = next_frame(&mut stream).await.unwrap();
            assert_eq!(frame.event, "message");
            let value: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
            assert_eq!(value["params"]["n"], n);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sends_do_not_interleave() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = open_test_transport(&registry, "a");
        next_frame(&mut stream).await.unwrap();

        let mut tasks = Vec::new();
        for n in 0..50 {
            let transport = transport.clone();
            tasks.push(tokio::spawn(
                async move { transport.send(notification(n)).await },
            ));
        }
        let reader = tokio::spawn(async move {
            let mut seen = Vec::new();
            while seen.len() < 50 {
                let frame = stream.frames.next().await.unwrap();
                let value: serde_json::Value = serde_json::from_str(&frame.data).unwrap();
                seen.push(value["params"]["n"].as_u64().unwrap());
            }
            seen
        });
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let mut seen = reader.await.unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let registry = SessionRegistry::new();
        let (a, mut stream_a) = open_test_transport(&registry, "a");
        let (_b, mut stream_b) = open_test_transport(&registry, "b");
        next_frame(&mut stream_a).await.unwrap();
        next_frame(&mut stream_b).await.unwrap();

        a.send(notification(1)).await.unwrap();
        drop(a);

        assert!(next_frame(&mut stream_a).await.is_some());
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(50), next_frame(&mut stream_b))
                .await;
        assert!(pending.is_err(), "session b must not see session a's message");
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let registry = SessionRegistry::new();
        let (transport, _stream) = open_test_transport(&registry, "a");

        transport.close();
        assert!(transport.is_closed());
        let err = transport.send(notification(1)).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let registry = SessionRegistry::new();
        let (transport, _stream) = open_test_transport(&registry, "a");
        registry.register("a", transport.clone()).unwrap();

        transport.close();
        transport.close();
        assert!(transport.is_closed());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_dropping_stream_closes_and_deregisters() {
        let registry = SessionRegistry::new();
        let (transport, stream) = open_test_transport(&registry, "a");
        registry.register("a", transport.clone()).unwrap();
        assert!(registry.lookup("a").is_some());

        drop(stream);

        assert!(registry.lookup("a").is_none());
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_close_ends_stream() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = open_test_transport(&registry, "a");
        next_frame(&mut stream).await.unwrap();

        transport.close();
        assert!(next_frame(&mut stream).await.is_none());
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_block_delivery() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = SseTransport::open(
            "a".to_string(),
            "/message",
            registry,
            &McpHandlerFactory::default(),
            Arc::new(FailingAudit),
        );
        next_frame(&mut stream).await.unwrap();

        transport.send(notification(7)).await.unwrap();
        let frame = next_frame(&mut stream).await.unwrap();
        assert!(frame.data.contains("\"n\":7"));
    }

    #[tokio::test]
    async fn test_every_sent_message_is_audited() {
        let audit = Arc::new(CountingAudit(AtomicUsize::new(0)));
        let (transport, _stream) = SseTransport::open(
            "a".to_string(),
            "/message",
            SessionRegistry::new(),
            &McpHandlerFactory::default(),
            audit.clone(),
        );

        transport.send(notification(1)).await.unwrap();
        transport.send(notification(2)).await.unwrap();
        assert_eq!(audit.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_handle_inbound_replies_on_stream() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = open_test_transport(&registry, "a");
        next_frame(&mut stream).await.unwrap();

        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
        let dispatched = transport.handle_inbound(body.as_bytes()).await.unwrap();
        assert!(dispatched.direct.is_none());

        let frame = next_frame(&mut stream).await.unwrap();
        let reply: JsonRpcResponse = serde_json::from_str(&frame.data).unwrap();
        assert_eq!(reply.id, Some(json!(1)));
        assert_eq!(reply.result, Some(json!({})));
    }

    #[tokio::test]
    async fn test_handle_inbound_rejects_malformed_body() {
        let registry = SessionRegistry::new();
        let (transport, _stream) = open_test_transport(&registry, "a");

        let err = transport.handle_inbound(b"not json").await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));

        let body = json!({"jsonrpc": "1.0", "id": 1, "method": "ping"}).to_string();
        let err = transport.handle_inbound(body.as_bytes()).await.unwrap_err();
        assert!(matches!(err, TransportError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_handle_inbound_rejects_bare_envelope() {
        let registry = SessionRegistry::new();
        let (transport, _stream) = open_test_transport(&registry, "a");

        for body in [
            json!({"jsonrpc": "2.0"}),
            json!({"jsonrpc": "2.0", "id": 1}),
            json!({"jsonrpc": "2.0", "foo": 3}),
        ] {
            let err = transport
                .handle_inbound(body.to_string().as_bytes())
                .await
                .unwrap_err();
            assert!(matches!(err, TransportError::Malformed(_)), "{}", body);
        }

        let body = json!({"jsonrpc": "2.0", "id": 5, "result": {}}).to_string();
        assert!(transport.handle_inbound(body.as_bytes()).await.is_ok());
    }

    #[tokio::test]
    async fn test_handle_inbound_after_close_fails() {
        let registry = SessionRegistry::new();
        let (transport, _stream) = open_test_transport(&registry, "a");
        transport.close();

        let body = json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}).to_string();
        let err = transport.handle_inbound(body.as_bytes()).await.unwrap_err();
        assert!(matches!(err, TransportError::NotOpen));
    }

    #[tokio::test]
    async fn test_session_handle_sends_until_closed() {
        let registry = SessionRegistry::new();
        let (transport, mut stream) = open_test_transport(&registry, "a");
        next_frame(&mut stream).await.unwrap();

        let handle = SessionHandle::for_transport(&transport);
        assert!(handle.is_open());
        handle.send(notification(3)).await.unwrap();
        assert!(next_frame(&mut stream).await.is_some());

        drop(stream);
        assert!(!handle.is_open());
        assert!(matches!(
            handle.send(notification(4)).await,
            Err(TransportError::NotOpen)
        ));
    }
}
