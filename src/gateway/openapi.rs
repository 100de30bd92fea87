//! OpenAPI / Swagger UI Documentation
//!
//! - Swagger UI: `http://localhost:8080/docs`
//! - OpenAPI JSON: `http://localhost:8080/api-docs/openapi.json`

use utoipa::OpenApi;

use crate::gateway::types::{HealthResponse, TransferBody, TransferResponse};

/// Main API Documentation struct
#[derive(OpenApi)]
#[openapi(
    info(
        title = "OCC Transfer API",
        version = "0.1.0",
        description = "Atomic balance transfers with retry on optimistic-concurrency conflicts.",
        license(
            name = "MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Development"),
    ),
    paths(
        crate::gateway::handlers::transfer,
        crate::gateway::handlers::health_check,
    ),
    components(
        schemas(
            TransferBody,
            TransferResponse,
            HealthResponse,
        )
    ),
    tags(
        (name = "Transfer", description = "Balance transfers"),
        (name = "System", description = "Health and diagnostics"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_transfer_endpoints() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/transfer"));
        assert!(doc.paths.paths.contains_key("/health"));

        let json = doc.to_json().expect("serialize openapi");
        assert!(json.contains("TransferResponse"));
    }
}
