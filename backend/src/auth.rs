//! Access control.
//!
//! The server can be locked down to a static allow-list of user IDs. The
//! caller identity is the user the host platform started this process for;
//! it is fixed for the process lifetime, as is the allow-list.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use relay_types::ErrorResponse;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::error;

/// Body of every 403 returned while in lockdown.
pub const LOCKDOWN_MESSAGE: &str =
    "The Actor is in lockdown mode. You are not allowed to access this resource.";

/// Allow-list of user IDs permitted to use this server.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    /// Empty means no restriction.
    allowed_user_ids: HashSet<String>,
    /// Identity of the caller this process serves.
    user_id: Option<String>,
}

impl AccessPolicy {
    pub fn new(
        allowed_user_ids: impl IntoIterator<Item = String>,
        user_id: Option<String>,
    ) -> Self {
        Self {
            allowed_user_ids: allowed_user_ids
                .into_iter()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty())
                .collect(),
            user_id,
        }
    }

    /// Policy that lets everyone in.
    pub fn unrestricted() -> Self {
        Self::default()
    }

    /// Check if an allow-list is configured
    pub fn is_restricted(&self) -> bool {
        !self.allowed_user_ids.is_empty()
    }

    /// Whether `user_id` may access the server.
    pub fn allows(&self, user_id: Option<&str>) -> bool {
        if !self.is_restricted() {
            return true;
        }
        user_id.is_some_and(|id| self.allowed_user_ids.contains(id))
    }

    /// Whether the caller this process serves may access the server.
    pub fn allows_caller(&self) -> bool {
        self.allows(self.user_id.as_deref())
    }
}

/// Middleware that rejects every request with 403 when the caller is not on
/// the allow-list.
pub async fn access_middleware(
    Extension(policy): Extension<Arc<AccessPolicy>>,
    request: Request,
    next: Next,
) -> Response {
    if policy.allows_caller() {
        return next.run(request).await;
    }

    error!(
        "{} ({} {})",
        LOCKDOWN_MESSAGE,
        request.method(),
        request.uri().path()
    );
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::new(LOCKDOWN_MESSAGE)),
    )
        .into_response()
}
