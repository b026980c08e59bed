//! Root endpoint: readiness probe and help.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use relay_types::{HelpResponse, ReadyResponse, HEADER_READINESS_PROBE};
use tracing::{debug, info};

use crate::state::AppState;

/// Readiness probe or help message.
///
/// A request carrying the `X-Readiness-Probe` header is answered immediately
/// without touching any session state. Otherwise returns how to connect,
/// plus metadata about this run.
#[utoipa::path(
    get,
    path = "/",
    tag = "gateway",
    params(
        ("X-Readiness-Probe" = Option<String>, Header, description = "Marks the request as a readiness probe")
    ),
    responses(
        (status = 200, description = "Ready acknowledgment or help message", body = HelpResponse),
        (status = 403, description = "Server is in lockdown", body = relay_types::ErrorResponse)
    )
)]
pub async fn root(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if headers.contains_key(HEADER_READINESS_PROBE) {
        debug!("Received readiness probe");
        return (StatusCode::OK, Json(ReadyResponse::ready())).into_response();
    }

    info!("Received GET message at root");
    let run = state.run();
    Json(HelpResponse {
        message: format!(
            "Actor is using Model Context Protocol. Connect to {}/sse to establish a connection.",
            run.public_url
        ),
        data: run.to_run_data(),
    })
    .into_response()
}
