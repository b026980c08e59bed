//! Shared types for the relay gateway.
//!
//! This crate contains the JSON-RPC wire types and the HTTP API payloads
//! shared between the gateway and its clients.

/// Default port for the relay server.
pub const DEFAULT_PORT: u16 = 3001;

/// Header that marks a request as a readiness probe.
pub const HEADER_READINESS_PROBE: &str = "x-readiness-probe";

pub mod api;
pub mod jsonrpc;

pub use api::{ErrorResponse, HelpResponse, ReadyResponse, RunData};
pub use jsonrpc::{ErrorEnvelope, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
