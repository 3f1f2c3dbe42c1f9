//! OpenAPI specification endpoints

use actix_web::{HttpResponse, Responder, get};
use utoipa::OpenApi;

use crate::api::error::{ApiError, ErrorResponse};
use crate::api::{audit, document, fact, health, pipeline, review};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Fact validation pipeline",
        description = "Validation, review and correction of document-extracted facts"
    ),
    paths(
        fact::ingest_facts,
        fact::list_facts,
        fact::get_fact,
        fact::correction_history,
        fact::state_at,
        document::register_document,
        document::list_documents,
        document::get_document,
        pipeline::run_pipeline,
        pipeline::cancel_domain,
        pipeline::last_report,
        pipeline::list_escalations,
        pipeline::list_consistency_checks,
        review::review_queue,
        review::confirm_fact,
        review::reject_fact,
        review::correct_fact,
        review::add_flag,
        review::resolve_flag,
        audit::export_audit,
        audit::audit_since,
        health::liveness,
        health::readiness,
    ),
    components(schemas(ErrorResponse)),
    tags(
        (name = "facts", description = "Fact ingestion and lookup"),
        (name = "documents", description = "Source documents for evidence checks"),
        (name = "pipeline", description = "Validation runs and escalations"),
        (name = "review", description = "Human review and corrections"),
        (name = "audit", description = "Audit export and replay"),
        (name = "health", description = "Probes")
    )
)]
pub struct ApiDoc;

/// Serve OpenAPI JSON specification
#[get("/openapi.json")]
pub async fn openapi_json() -> impl Responder {
    HttpResponse::Ok().json(ApiDoc::openapi())
}

/// Serve OpenAPI YAML specification
#[get("/openapi.yaml")]
pub async fn openapi_yaml() -> Result<HttpResponse, ApiError> {
    let yaml = ApiDoc::openapi()
        .to_yaml()
        .map_err(|e| ApiError::Internal(format!("rendering OpenAPI YAML: {}", e)))?;
    Ok(HttpResponse::Ok().content_type("text/yaml").body(yaml))
}

/// Configure OpenAPI routes
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    cfg.service(openapi_json).service(openapi_yaml);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        for path in [
            "/v1/facts",
            "/v1/facts/{id}/corrections",
            "/v1/pipeline/run",
            "/v1/review/queue",
            "/v1/audit",
            "/health/ready",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }
}
