//! REST API endpoints for audit export

use actix_web::{HttpResponse, get, web};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::model::{AuditEntry, AuditFilter, Domain};

#[derive(Debug, Deserialize, IntoParams)]
pub struct AuditParams {
    /// Only entries targeting this fact
    pub fact_id: Option<String>,
    /// Only entries for this domain
    pub domain: Option<Domain>,
    /// Inclusive lower bound (RFC 3339)
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound (RFC 3339)
    pub to: Option<DateTime<Utc>>,
}

/// Export audit entries in append order
#[utoipa::path(
    get,
    path = "/v1/audit",
    params(AuditParams),
    responses(
        (status = 200, description = "Audit entries", body = Vec<AuditEntry>),
        (status = 400, description = "Empty time range", body = crate::api::error::ErrorResponse)
    ),
    tag = "audit"
)]
#[get("/v1/audit")]
pub async fn export_audit(
    state: web::Data<AppState>,
    query: web::Query<AuditParams>,
) -> Result<HttpResponse, ApiError> {
    let AuditParams {
        fact_id,
        domain,
        from,
        to,
    } = query.into_inner();
    if let (Some(from), Some(to)) = (from, to) {
        if from > to {
            return Err(ApiError::BadRequest(format!(
                "'from' ({}) is after 'to' ({})",
                from, to
            )));
        }
    }
    let filter = AuditFilter {
        fact_id,
        domain,
        from,
        to,
    };
    Ok(HttpResponse::Ok().json(state.store.audit().export(&filter).await))
}

/// Entries appended after a global sequence number
#[utoipa::path(
    get,
    path = "/v1/audit/since/{sequence}",
    params(("sequence" = u64, Path, description = "Last sequence already seen")),
    responses(
        (status = 200, description = "Newer audit entries", body = Vec<AuditEntry>)
    ),
    tag = "audit"
)]
#[get("/v1/audit/since/{sequence}")]
pub async fn audit_since(
    state: web::Data<AppState>,
    path: web::Path<u64>,
) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.store.audit().since(path.into_inner()).await))
}

/// Configure audit routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(export_audit).service(audit_since);
}
