//! MCP (Model Context Protocol) over SSE.
//!
//! This module implements the HTTP+SSE transport: a client opens a
//! long-lived event stream, learns its session ID from the first event, and
//! POSTs JSON-RPC messages addressed to that session. Replies and
//! server-initiated messages travel back on the stream.
//!
//! ## Endpoints
//!
//! - `GET /sse` - Open a session stream
//! - `POST /message?sessionId=...` - Submit a message to an open session
//!
//! ## Session Management
//!
//! Sessions live in the [`SessionRegistry`] from the moment their stream
//! opens until it closes, whether the client disconnects or the server
//! drains on shutdown.

pub mod handler;
pub mod registry;
pub mod transport;

pub use handler::{Dispatched, Dispatcher, DispatcherFactory, McpHandler, McpHandlerFactory};
pub use registry::{RegistryError, SessionRegistry, SessionSummary};
pub use transport::{SessionHandle, SessionStream, SseTransport, TransportError};
