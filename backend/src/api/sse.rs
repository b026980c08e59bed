//! Session stream endpoint.

use axum::extract::State;
use axum::response::sse::{KeepAlive, KeepAliveStream, Sse};
use std::time::Duration;
use tracing::info;

use crate::error::GatewayError;
use crate::mcp::SessionStream;
use crate::state::AppState;

/// Open a new MCP session.
///
/// The response is a long-lived Server-Sent Events stream. Its first event
/// is `endpoint`, whose data is the URL (including the session ID) that
/// messages for this session must be POSTed to. Protocol messages follow as
/// `message` events. The session ends when the client disconnects or the
/// server shuts down.
///
/// Example usage from JavaScript:
/// ```javascript
/// const eventSource = new EventSource('http://localhost:3001/sse');
/// eventSource.addEventListener('endpoint', (event) => {
///     console.log('POST messages to:', event.data);
/// });
/// eventSource.addEventListener('message', (event) => {
///     console.log('Received:', JSON.parse(event.data));
/// });
/// ```
#[utoipa::path(
    get,
    path = "/sse",
    tag = "gateway",
    responses(
        (status = 200, description = "Event stream established", content_type = "text/event-stream", body = String),
        (status = 500, description = "Internal server error", body = relay_types::ErrorEnvelope),
        (status = 503, description = "Server is shutting down", body = relay_types::ErrorEnvelope)
    )
)]
pub async fn open_stream(
    State(state): State<AppState>,
) -> Result<Sse<KeepAliveStream<SessionStream>>, GatewayError> {
    info!("Received GET message at /sse");
    let stream = state.open_session()?;
    info!(
        "SSE stream opened for session {} (live sessions: {})",
        stream.session_id(),
        state.registry().len()
    );

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
