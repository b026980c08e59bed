//! Relay backend library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, Method};
use axum::{
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

pub mod api;
pub mod audit;
pub mod auth;
pub mod config;
pub mod error;
pub mod mcp;
pub mod metering;
pub mod openapi;
pub mod shutdown;
pub mod state;

use auth::AccessPolicy;
use state::AppState;

/// Create the Axum application router.
///
/// This function is used both by the main server binary and by integration tests.
pub async fn create_app() -> Router {
    create_app_with_state(AppState::default()).await
}

/// Create the Axum application router with a given state and no access restriction.
pub async fn create_app_with_state(state: AppState) -> Router {
    create_app_with_config(state, AccessPolicy::unrestricted()).await
}

/// Create the Axum application router with a given state and access policy.
///
/// When the policy denies the caller, every route answers 403.
pub async fn create_app_with_config(state: AppState, policy: AccessPolicy) -> Router {
    if policy.is_restricted() {
        tracing::info!("Access restricted to an allow-list of user IDs");
        if !policy.allows_caller() {
            tracing::warn!("Caller is not on the allow-list, server is in lockdown");
        }
    }

    Router::new()
        .route("/", get(api::root::root))
        .route("/sse", get(api::sse::open_stream))
        .route(state::MESSAGE_PATH, post(api::message::post_message))
        .route("/api-docs/openapi.json", get(openapi_json))
        .layer(middleware::from_fn(auth::access_middleware))
        .layer(Extension(Arc::new(policy)))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                .allow_headers([
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    header::CACHE_CONTROL,
                    HeaderName::from_static(relay_types::HEADER_READINESS_PROBE),
                ])
                .allow_origin(Any),
        )
        .with_state(state)
}

/// OpenAPI document.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(openapi::ApiDoc::openapi())
}
