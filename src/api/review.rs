//! REST API endpoints for human review

use actix_web::{HttpResponse, get, post, web};
use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::model::{CorrectionRequest, CorrectionResult, Domain, Flag, FlagSeverity, ValidationState};
use crate::service::{QueueFilter, QueueItem};

#[derive(Debug, Deserialize, IntoParams)]
pub struct QueueParams {
    /// Filter by domain
    pub domain: Option<Domain>,
    /// Only facts with an open flag at or above this severity
    pub min_severity: Option<FlagSeverity>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConfirmRequest {
    pub reviewer: String,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub reviewer: String,
    pub reason: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ManualFlagRequest {
    pub severity: FlagSeverity,
    pub message: String,
    pub author: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResolveFlagRequest {
    pub resolver: String,
}

fn require_actor(actor: &str, role: &str) -> Result<(), ApiError> {
    if actor.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", role)));
    }
    Ok(())
}

/// Severity-sorted review queue
#[utoipa::path(
    get,
    path = "/v1/review/queue",
    params(QueueParams),
    responses(
        (status = 200, description = "Queue retrieved", body = Vec<QueueItem>)
    ),
    tag = "review"
)]
#[get("/v1/review/queue")]
pub async fn review_queue(
    state: web::Data<AppState>,
    query: web::Query<QueueParams>,
) -> Result<HttpResponse, ApiError> {
    let filter = QueueFilter {
        domain: query.domain,
        min_severity: query.min_severity,
    };
    Ok(HttpResponse::Ok().json(state.review.queue(&filter).await))
}

#[utoipa::path(
    post,
    path = "/v1/facts/{id}/confirm",
    params(("id" = String, Path, description = "Fact ID")),
    request_body = ConfirmRequest,
    responses(
        (status = 200, description = "Fact confirmed", body = ValidationState),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Fact already decided", body = crate::api::error::ErrorResponse)
    ),
    tag = "review"
)]
#[post("/v1/facts/{id}/confirm")]
pub async fn confirm_fact(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ConfirmRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    require_actor(&body.reviewer, "reviewer")?;
    let updated = state
        .review
        .confirm(&path.into_inner(), body.reviewer.trim(), body.notes)
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    post,
    path = "/v1/facts/{id}/reject",
    params(("id" = String, Path, description = "Fact ID")),
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Fact rejected", body = ValidationState),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse),
        (status = 409, description = "Fact already decided", body = crate::api::error::ErrorResponse)
    ),
    tag = "review"
)]
#[post("/v1/facts/{id}/reject")]
pub async fn reject_fact(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<RejectRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    require_actor(&body.reviewer, "reviewer")?;
    let updated = state
        .review
        .reject(&path.into_inner(), body.reviewer.trim(), body.reason)
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// Correct a fact; the response is sent once the correction is durable
#[utoipa::path(
    post,
    path = "/v1/facts/{id}/corrections",
    params(("id" = String, Path, description = "Fact ID")),
    request_body = CorrectionRequest,
    responses(
        (status = 200, description = "Correction applied", body = CorrectionResult),
        (status = 400, description = "No correctable field", body = crate::api::error::ErrorResponse),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "review"
)]
#[post("/v1/facts/{id}/corrections")]
pub async fn correct_fact(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<CorrectionRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = body.into_inner();
    require_actor(&request.author, "author")?;
    let result = state.correction.correct(&path.into_inner(), request).await?;
    Ok(HttpResponse::Ok().json(result))
}

#[utoipa::path(
    post,
    path = "/v1/facts/{id}/flags",
    params(("id" = String, Path, description = "Fact ID")),
    request_body = ManualFlagRequest,
    responses(
        (status = 201, description = "Flag added", body = Flag),
        (status = 404, description = "Fact not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "review"
)]
#[post("/v1/facts/{id}/flags")]
pub async fn add_flag(
    state: web::Data<AppState>,
    path: web::Path<String>,
    body: web::Json<ManualFlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let body = body.into_inner();
    require_actor(&body.author, "author")?;
    let flag = state
        .review
        .add_manual_flag(&path.into_inner(), body.severity, &body.message, body.author.trim())
        .await?;
    Ok(HttpResponse::Created().json(flag))
}

#[utoipa::path(
    post,
    path = "/v1/facts/{id}/flags/{flag_id}/resolve",
    params(
        ("id" = String, Path, description = "Fact ID"),
        ("flag_id" = Uuid, Path, description = "Flag ID")
    ),
    request_body = ResolveFlagRequest,
    responses(
        (status = 200, description = "Flag resolved", body = ValidationState),
        (status = 404, description = "Fact or flag not found", body = crate::api::error::ErrorResponse)
    ),
    tag = "review"
)]
#[post("/v1/facts/{id}/flags/{flag_id}/resolve")]
pub async fn resolve_flag(
    state: web::Data<AppState>,
    path: web::Path<(String, Uuid)>,
    body: web::Json<ResolveFlagRequest>,
) -> Result<HttpResponse, ApiError> {
    let (fact_id, flag_id) = path.into_inner();
    require_actor(&body.resolver, "resolver")?;
    let updated = state
        .review
        .resolve_flag(&fact_id, flag_id, body.resolver.trim())
        .await?;
    Ok(HttpResponse::Ok().json(updated))
}

/// Configure review routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(review_queue)
        .service(confirm_fact)
        .service(reject_fact)
        .service(correct_fact)
        .service(add_flag)
        .service(resolve_flag);
}
