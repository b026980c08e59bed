//! API request and response types.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

// ============================================================================
// Root Endpoint Types
// ============================================================================

/// Body returned to readiness probes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ReadyResponse {
    pub message: String,
}

impl ReadyResponse {
    pub fn ready() -> Self {
        Self {
            message: "Server is ready".to_string(),
        }
    }
}

/// Metadata about the current server run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct RunData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<String>,
    pub run_id: String,
    /// RFC 3339 timestamp of process start.
    pub started_at: String,
}

/// Human readable help returned by `GET /`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct HelpResponse {
    pub message: String,
    pub data: RunData,
}

// ============================================================================
// Error Response
// ============================================================================

/// Plain error response used outside the JSON-RPC surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: Some(details.into()),
        }
    }
}
