use actix_web::{App, HttpServer, web};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use da_fact_validation::api;
use da_fact_validation::app::AppState;
use da_fact_validation::model::Config;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present (ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let bind_addr = config.bind_addr();

    let state = AppState::new(config).expect("Invalid pipeline configuration");
    if !state.semantic_review_enabled {
        tracing::warn!("SEMANTIC_REVIEW_URL not set, category checks run without semantic review");
    }
    if !state.extraction_enabled {
        tracing::warn!("EXTRACTION_URL not set, retries cannot request re-extraction");
    }
    let state = web::Data::new(state);

    tracing::info!("Starting fact validation server on {}", bind_addr);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .configure(api::configure)
    })
    .bind(&bind_addr)?
    .run()
    .await
}
