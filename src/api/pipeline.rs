//! REST API endpoints for running the validation pipeline

use actix_web::{HttpResponse, get, post, web};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::app::AppState;
use crate::model::{ConsistencyCheck, Domain, EscalationRecord, PipelineReport};

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RunRequest {
    /// Domains to validate; all domains when omitted or empty
    #[serde(default)]
    pub domains: Option<Vec<Domain>>,
}

/// Consistency checks of the latest run
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckSet {
    /// Run that produced the checks, absent before the first run
    pub run_id: Option<Uuid>,
    pub checks: Vec<ConsistencyCheck>,
}

/// Run validation and return the aggregate report
#[utoipa::path(
    post,
    path = "/v1/pipeline/run",
    request_body = RunRequest,
    responses(
        (status = 200, description = "Run completed", body = PipelineReport),
        (status = 409, description = "State conflict while committing", body = crate::api::error::ErrorResponse)
    ),
    tag = "pipeline"
)]
#[post("/v1/pipeline/run")]
pub async fn run_pipeline(
    state: web::Data<AppState>,
    body: Option<web::Json<RunRequest>>,
) -> Result<HttpResponse, ApiError> {
    let request = body.map(web::Json::into_inner).unwrap_or_default();
    let report = state.orchestrator.run(request.domains).await?;
    Ok(HttpResponse::Ok().json(report))
}

/// Abort the retry loop of a domain; it is escalated before its next attempt
#[utoipa::path(
    post,
    path = "/v1/pipeline/{domain}/cancel",
    params(("domain" = Domain, Path, description = "Domain to cancel")),
    responses(
        (status = 202, description = "Cancellation requested")
    ),
    tag = "pipeline"
)]
#[post("/v1/pipeline/{domain}/cancel")]
pub async fn cancel_domain(
    state: web::Data<AppState>,
    path: web::Path<Domain>,
) -> Result<HttpResponse, ApiError> {
    state.orchestrator.cancel(path.into_inner());
    Ok(HttpResponse::Accepted().finish())
}

/// Report of the most recent run
#[utoipa::path(
    get,
    path = "/v1/pipeline/report",
    responses(
        (status = 200, description = "Last report", body = PipelineReport),
        (status = 404, description = "No run yet", body = crate::api::error::ErrorResponse)
    ),
    tag = "pipeline"
)]
#[get("/v1/pipeline/report")]
pub async fn last_report(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    state
        .orchestrator
        .last_report()
        .await
        .map(|report| HttpResponse::Ok().json(report))
        .ok_or_else(|| ApiError::NotFound("no pipeline run yet".to_string()))
}

/// Domains handed to human review after automation gave up
#[utoipa::path(
    get,
    path = "/v1/escalations",
    responses(
        (status = 200, description = "Escalations", body = Vec<EscalationRecord>)
    ),
    tag = "pipeline"
)]
#[get("/v1/escalations")]
pub async fn list_escalations(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    Ok(HttpResponse::Ok().json(state.store.escalations().await))
}

/// Consistency checks of the latest run; earlier runs are in the audit log
#[utoipa::path(
    get,
    path = "/v1/consistency-checks",
    responses(
        (status = 200, description = "Consistency checks", body = CheckSet)
    ),
    tag = "pipeline"
)]
#[get("/v1/consistency-checks")]
pub async fn list_consistency_checks(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let (run_id, checks) = state.store.consistency_checks().await;
    Ok(HttpResponse::Ok().json(CheckSet { run_id, checks }))
}

/// Configure pipeline routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(run_pipeline)
        .service(cancel_domain)
        .service(last_report)
        .service(list_escalations)
        .service(list_consistency_checks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;
    use actix_web::{App, http::StatusCode, test};
    use serde_json::json;

    #[actix_web::test]
    async fn test_run_then_report() {
        let state = web::Data::new(AppState::new(Config::default()).unwrap());
        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let response = test::call_service(
            &app,
            test::TestRequest::get().uri("/v1/pipeline/report").to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let report: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::post()
                .uri("/v1/pipeline/run")
                .set_json(json!({ "domains": ["network"] }))
                .to_request(),
        )
        .await;
        assert_eq!(report["domains"][0]["domain"], json!("network"));
        assert_eq!(report["escalations"].as_array().unwrap().len(), 1);

        let escalations: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/v1/escalations").to_request(),
        )
        .await;
        assert_eq!(escalations.as_array().unwrap().len(), 1);

        let checks: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/v1/consistency-checks").to_request(),
        )
        .await;
        assert_eq!(checks["run_id"], report["run_id"]);

        let response = test::call_service(
            &app,
            test::TestRequest::post().uri("/v1/pipeline/network/cancel").to_request(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
