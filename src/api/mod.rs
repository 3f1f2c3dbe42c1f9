pub mod audit;
pub mod document;
pub mod error;
pub mod fact;
pub mod health;
pub mod openapi;
pub mod pipeline;
pub mod review;

use actix_web::web;

/// Register every route of the service
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(openapi::configure)
        .configure(fact::configure)
        .configure(document::configure)
        .configure(pipeline::configure)
        .configure(review::configure)
        .configure(audit::configure);
}
