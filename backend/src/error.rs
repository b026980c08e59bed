//! Errors surfaced at the HTTP boundary.
//!
//! Every failure leaving the gateway is rendered as a JSON-RPC error
//! envelope. Caller mistakes get a specific `-32000` message; anything else
//! becomes a generic `-32603` with the detail kept in the server log.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use relay_types::jsonrpc::{INTERNAL_ERROR, SERVER_ERROR};
use relay_types::ErrorEnvelope;
use thiserror::Error;
use tracing::{error, warn};

use crate::mcp::TransportError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Missing sessionId")]
    MissingSessionId,
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Invalid message: {0}")]
    MalformedPayload(String),
    #[error("Message body too large")]
    PayloadTooLarge,
    #[error("Server is shutting down")]
    ShuttingDown,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::MissingSessionId | GatewayError::MalformedPayload(_) => {
                StatusCode::BAD_REQUEST
            }
            GatewayError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The envelope shown to the caller.
    pub fn envelope(&self) -> ErrorEnvelope {
        match self {
            GatewayError::MissingSessionId => {
                ErrorEnvelope::new(SERVER_ERROR, "Bad Request: Missing sessionId")
            }
            GatewayError::SessionNotFound(_) => {
                ErrorEnvelope::new(SERVER_ERROR, "Bad Request: Session not found")
            }
            GatewayError::MalformedPayload(detail) => {
                let message = format!("Bad Request: Invalid message: {}", detail);
                ErrorEnvelope::new(SERVER_ERROR, message)
            }
            GatewayError::PayloadTooLarge => {
                ErrorEnvelope::new(SERVER_ERROR, "Bad Request: Message body too large")
            }
            GatewayError::ShuttingDown => {
                let message = "Service Unavailable: Server is shutting down";
                ErrorEnvelope::new(SERVER_ERROR, message)
            }
            GatewayError::Internal(_) => ErrorEnvelope::new(INTERNAL_ERROR, "Internal server error"),
        }
    }
}

impl From<TransportError> for GatewayError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Malformed(detail) => GatewayError::MalformedPayload(detail),
            other => GatewayError::Internal(other.into()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Internal(ref e) => error!("Request failed: {:#}", e),
            ref caller => warn!("Rejected request: {}", caller),
        }
        (self.status(), Json(self.envelope())).into_response()
    }
}
