//! REST API endpoints for fact ingestion and lookup

use actix_web::{HttpResponse, get, post, web};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::model::{CorrectionRecord, Domain, Fact, Gap, NewFact, ValidationState, ValidationStatus};

const INGEST_ACTOR: &str = "extraction";

/// Batch submitted by the extraction process
#[derive(Debug, Deserialize, ToSchema)]
pub struct IngestRequest {
    #[serde(default)]
    pub facts: Vec<NewFact>,
    /// Information the extractor declared absent from the source
    #[serde(default)]
    pub gaps: Vec<Gap>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestedFact {
    pub id: String,
    /// False when the fact was already known under the same dedup key
    pub created: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct IngestResponse {
    pub facts: Vec<IngestedFact>,
    pub gaps: usize,
}

/// Query parameters for listing facts
#[derive(Debug, Deserialize, IntoParams)]
pub struct ListFactsParams {
    /// Filter by domain
    pub domain: Option<Domain>,
    /// Filter by validation status
    pub status: Option<ValidationStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct FactView {
    pub fact: Fact,
    pub state: ValidationState,
    pub effective_confidence: f64,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StateAtParams {
    /// Instant to reconstruct the state at (RFC 3339)
    pub at: DateTime<Utc>,
}

fn check_new_fact(fact: &NewFact) -> Result<(), ApiError> {
    if fact.category.trim().is_empty() || fact.item.trim().is_empty() {
        return Err(ApiError::BadRequest("fact category and item are required".to_string()));
    }
    if fact.source_document_ref.trim().is_empty() {
        return Err(ApiError::BadRequest(format!(
            "fact '{}' has no source_document_ref",
            fact.item
        )));
    }
    Ok(())
}

/// Submit extracted facts; idempotent under the content-based dedup key
#[utoipa::path(
    post,
    path = "/v1/facts",
    request_body = IngestRequest,
    responses(
        (status = 200, description = "Facts ingested", body = IngestResponse),
        (status = 400, description = "Invalid batch", body = crate::api::error::ErrorResponse)
    ),
    tag = "facts"
)]
#[post("/v1/facts")]
pub async fn ingest_facts(
    state: web::Data<AppState>,
    body: web::Json<IngestRequest>,
) -> Result<HttpResponse, ApiError> {
    let IngestRequest { facts, gaps } = body.into_inner();
    if facts.is_empty() && gaps.is_empty() {
        return Err(ApiError::BadRequest("batch contains no facts or gaps".to_string()));
    }
    for fact in &facts {
        check_new_fact(fact)?;
    }

    let mut ingested = Vec::with_capacity(facts.len());
    for fact in facts {
        let (id, created) = state.store.ingest(fact, INGEST_ACTOR).await;
        ingested.push(IngestedFact { id, created });
    }
    let gap_count = gaps.len();
    for gap in gaps {
        state.store.record_gap(gap).await;
    }

    tracing::info!(
        facts = ingested.len(),
        created = ingested.iter().filter(|f| f.created).count(),
        gaps = gap_count,
        "Fact batch ingested"
    );

    Ok(HttpResponse::Ok().json(IngestResponse {
        facts: ingested,
        gaps: gap_count,
    }))
}

/// List facts with their validation state
#[utoipa::path(
    get,
    path = "/v1/facts",
    params(ListFactsParams),
    responses(
        (status = 200, description = "Facts retrieved", body = Vec<FactView>)
    ),
    tag = "facts"
)]
#[get("/v1/facts")]
pub async fn list_facts(
    state: web::Data<AppState>,
    query: web::Query<ListFactsParams>,
) -> Result<HttpResponse, ApiError> {
    let mut views = Vec::new();
    for fact in state.store.facts().await {
        if query.domain.is_some_and(|d| d != fact.domain) {
            continue;
        }
        let validation = state.store.state(&fact.id).await?.value;
        if query.status.is_some_and(|s| s != validation.status) {
            continue;
        }
        views.push(FactView {
            effective_confidence: validation.effective_confidence(),
            fact,
            state: validation,
        });
    }
    Ok(HttpResponse::Ok().json(views))
}

/// Get one fact with its validation state
#[utoipa::path(
    get,
    path = "/v1/facts/{id}",
    params(("id" = String, Path, description = "Fact ID")),
    responses(
        (status = 200, description = "Fact retrieved", body = FactView),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "facts"
)]
#[get("/v1/facts/{id}")]
pub async fn get_fact(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let fact = state.store.fact(&id).await?.value;
    let validation = state.store.state(&id).await?.value;
    Ok(HttpResponse::Ok().json(FactView {
        effective_confidence: validation.effective_confidence(),
        fact,
        state: validation,
    }))
}

/// Correction history of a fact, oldest first
#[utoipa::path(
    get,
    path = "/v1/facts/{id}/corrections",
    params(("id" = String, Path, description = "Fact ID")),
    responses(
        (status = 200, description = "Correction history", body = Vec<CorrectionRecord>),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "facts"
)]
#[get("/v1/facts/{id}/corrections")]
pub async fn correction_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    state.store.fact(&id).await?;
    Ok(HttpResponse::Ok().json(state.corrections.history(&id).await))
}

/// Reconstruct a fact's validation state at a past instant from the audit log
#[utoipa::path(
    get,
    path = "/v1/facts/{id}/state-at",
    params(("id" = String, Path, description = "Fact ID"), StateAtParams),
    responses(
        (status = 200, description = "Replayed state", body = ValidationState),
        (status = 404, description = "No state recorded before that instant", body = crate::api::error::ErrorResponse)
    ),
    tag = "audit"
)]
#[get("/v1/facts/{id}/state-at")]
pub async fn state_at(
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<StateAtParams>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    match state.store.audit().replay_state(&id, query.at).await {
        Some(replayed) => Ok(HttpResponse::Ok().json(replayed)),
        None => Err(ApiError::NotFound(format!("state of {} at {}", id, query.at))),
    }
}

/// Configure fact routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(ingest_facts)
        .service(list_facts)
        .service(get_fact)
        .service(correction_history)
        .service(state_at);
}
