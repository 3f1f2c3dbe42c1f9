//! REST API endpoints for source documents
//!
//! Evidence is verified against the text registered here under the reference
//! facts cite in `source_document_ref`.

use actix_web::{HttpResponse, get, put, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::api::error::ApiError;
use crate::app::AppState;

const DOCUMENT_ACTOR: &str = "extraction";

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterDocumentRequest {
    pub content: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentSummary {
    pub reference: String,
    pub length: usize,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DocumentResponse {
    pub reference: String,
    pub content: String,
}

/// Register (or replace) the text of a source document
#[utoipa::path(
    put,
    path = "/v1/documents/{reference}",
    params(("reference" = String, Path, description = "Document reference cited by facts")),
    request_body = RegisterDocumentRequest,
    responses(
        (status = 204, description = "Document registered"),
        (status = 400, description = "Empty document", body = crate::api::error::ErrorResponse)
    ),
    tag = "documents"
)]
#[put("/v1/documents/{reference}")]
pub async fn register_document(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RegisterDocumentRequest>,
) -> Result<HttpResponse, ApiError> {
    let reference = path.into_inner();
    let content = body.into_inner().content;
    if content.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("document '{}' is empty", reference)));
    }
    state
        .store
        .register_document(&reference, content, DOCUMENT_ACTOR)
        .await;
    tracing::info!(reference = %reference, "Source document registered");
    Ok(HttpResponse::NoContent().finish())
}

/// List registered source documents
#[utoipa::path(
    get,
    path = "/v1/documents",
    responses(
        (status = 200, description = "Documents retrieved", body = Vec<DocumentSummary>)
    ),
    tag = "documents"
)]
#[get("/v1/documents")]
pub async fn list_documents(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let mut summaries: Vec<DocumentSummary> = state
        .store
        .documents()
        .await
        .into_iter()
        .map(|(reference, content)| DocumentSummary {
            reference,
            length: content.chars().count(),
        })
        .collect();
    summaries.sort_by(|a, b| a.reference.cmp(&b.reference));
    Ok(HttpResponse::Ok().json(summaries))
}

/// Get a source document by reference
#[utoipa::path(
    get,
    path = "/v1/documents/{reference}",
    params(("reference" = String, Path, description = "Document reference")),
    responses(
        (status = 200, description = "Document retrieved", body = DocumentResponse),
        (status = 404, description = "Document not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "documents"
)]
#[get("/v1/documents/{reference}")]
pub async fn get_document(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let reference = path.into_inner();
    match state.store.document(&reference).await {
        Some(content) => Ok(HttpResponse::Ok().json(DocumentResponse { reference, content })),
        None => Err(ApiError::NotFound(format!("document {}", reference))),
    }
}

/// Configure document routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(register_document)
        .service(list_documents)
        .service(get_document);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn test_register_and_fetch_document() {
        let state = web::Data::new(AppState::new(Config::default()).unwrap());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let response = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/v1/documents/doc-1")
                .set_json(json!({ "content": "We operate 47 applications." }))
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let document: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/v1/documents/doc-1").to_request(),
        )
        .await;
        assert_eq!(document["content"], json!("We operate 47 applications."));

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/documents/doc-2").to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
