//! Message submission endpoint.

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use tracing::{debug, info};
use utoipa::IntoParams;

use crate::error::GatewayError;
use crate::state::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    /// Session ID announced in the stream's `endpoint` event
    pub session_id: Option<String>,
}

/// Submit a JSON-RPC message to an open session.
///
/// Replies are normally delivered on the session's event stream, in which
/// case this returns `202 Accepted`. A dispatcher may also answer directly,
/// which returns the reply with `200 OK`.
#[utoipa::path(
    post,
    path = "/message",
    tag = "gateway",
    params(MessageQuery),
    request_body(content = String, description = "JSON-RPC 2.0 message", content_type = "application/json"),
    responses(
        (status = 200, description = "Direct reply from the dispatcher"),
        (status = 202, description = "Message accepted, replies follow on the stream"),
        (status = 400, description = "Missing session ID or malformed message", body = relay_types::ErrorEnvelope),
        (status = 404, description = "Session not found", body = relay_types::ErrorEnvelope),
        (status = 413, description = "Message body too large", body = relay_types::ErrorEnvelope),
        (status = 500, description = "Internal server error", body = relay_types::ErrorEnvelope)
    )
)]
pub async fn post_message(
    State(state): State<AppState>,
    query: Result<Query<MessageQuery>, QueryRejection>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, GatewayError> {
    info!("Received POST message at /message");

    let session_id = query
        .ok()
        .and_then(|Query(q)| q.session_id)
        .filter(|id| !id.is_empty())
        .ok_or(GatewayError::MissingSessionId)?;

    let transport = state
        .registry()
        .lookup(&session_id)
        .ok_or_else(|| GatewayError::SessionNotFound(session_id.clone()))?;

    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            GatewayError::PayloadTooLarge
        } else {
            GatewayError::MalformedPayload(rejection.body_text())
        }
    })?;

    debug!("Received POST message for session {}", session_id);
    let dispatched = transport.handle_inbound(&body).await?;

    Ok(match dispatched.direct {
        Some(reply) => (StatusCode::OK, Json(reply)).into_response(),
        None => (StatusCode::ACCEPTED, "Accepted").into_response(),
    })
}
