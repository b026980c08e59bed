//! OpenAPI documentation configuration.

use relay_types::jsonrpc::{ErrorEnvelope, JsonRpcError};
use relay_types::{ErrorResponse, HelpResponse, ReadyResponse, RunData};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::root::root,
        crate::api::sse::open_stream,
        crate::api::message::post_message,
    ),
    components(
        schemas(
            ReadyResponse,
            HelpResponse,
            RunData,
            ErrorEnvelope,
            JsonRpcError,
            ErrorResponse,
        )
    ),
    tags(
        (name = "gateway", description = "MCP over SSE session endpoints")
    ),
    info(
        title = "Relay MCP Gateway API",
        version = "0.1.0",
        description = "Multiplexes MCP sessions over Server-Sent Events",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_gateway_paths() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();
        assert!(paths.contains(&"/".to_string()));
        assert!(paths.contains(&"/sse".to_string()));
        assert!(paths.contains(&"/message".to_string()));
    }
}
