//! Health check endpoints for Kubernetes liveness and readiness probes

use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;

#[derive(Serialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

#[derive(Serialize, ToSchema)]
pub struct ReadinessStatus {
    pub status: String,
    pub version: String,
    pub dependencies: DependencyHealth,
}

#[derive(Serialize, ToSchema)]
pub struct DependencyHealth {
    pub semantic_review: String,
    pub extraction: String,
}

fn collaborator_status(enabled: bool) -> String {
    if enabled { "configured" } else { "disabled" }.to_string()
}

/// Liveness probe endpoint
///
/// Always returns 200 OK if the service is running.
#[utoipa::path(
    get,
    path = "/health/live",
    responses(
        (status = 200, description = "Service is alive", body = HealthStatus)
    ),
    tag = "health"
)]
#[get("/health/live")]
pub async fn liveness() -> impl Responder {
    HttpResponse::Ok().json(HealthStatus {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness probe endpoint
///
/// Stores are in-process, so the service is ready once started. Disabled
/// collaborators degrade validation rather than block it.
#[utoipa::path(
    get,
    path = "/health/ready",
    responses(
        (status = 200, description = "Service is ready", body = ReadinessStatus)
    ),
    tag = "health"
)]
#[get("/health/ready")]
pub async fn readiness(state: web::Data<AppState>) -> impl Responder {
    let dependencies = DependencyHealth {
        semantic_review: collaborator_status(state.semantic_review_enabled),
        extraction: collaborator_status(state.extraction_enabled),
    };
    if !state.semantic_review_enabled {
        tracing::debug!("Semantic review disabled, category checks run degraded");
    }

    HttpResponse::Ok().json(ReadinessStatus {
        status: "ready".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        dependencies,
    })
}

/// Configure health check routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(liveness).service(readiness);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Config;
    use actix_web::{App, test};

    #[actix_web::test]
    async fn test_readiness_reports_disabled_collaborators() {
        let state = web::Data::new(AppState::new(Config::default()).unwrap());
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;

        let body: serde_json::Value = test::call_and_read_body_json(
            &app,
            test::TestRequest::get().uri("/health/ready").to_request(),
        )
        .await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["dependencies"]["semantic_review"], "disabled");
        assert_eq!(body["dependencies"]["extraction"], "disabled");
    }
}
