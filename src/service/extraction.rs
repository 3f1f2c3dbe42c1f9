//! Targeted re-extraction collaborator

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::model::{Domain, NewFact, RerunGuidance};

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction service unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

/// Request for a targeted re-extraction of one domain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReextractionRequest {
    pub domain: Domain,
    pub attempt: u32,
    pub guidance: RerunGuidance,
}

/// Upstream extraction process, asked to look again for specific items
#[async_trait]
pub trait ExtractionCollaborator: Send + Sync {
    async fn reextract(&self, request: &ReextractionRequest) -> Result<Vec<NewFact>, ExtractionError>;
}

/// Collaborator used when no extraction service is configured
#[derive(Debug, Clone, Default)]
pub struct NullExtractor;

#[async_trait]
impl ExtractionCollaborator for NullExtractor {
    async fn reextract(&self, request: &ReextractionRequest) -> Result<Vec<NewFact>, ExtractionError> {
        tracing::debug!(domain = %request.domain, "No extraction service configured, returning empty batch");
        Ok(Vec::new())
    }
}

#[derive(Debug, Deserialize)]
struct ReextractionResponse {
    #[serde(default)]
    facts: Vec<NewFact>,
}

/// Extraction service reached over HTTP
pub struct HttpExtractionClient {
    client: Client,
    url: String,
}

impl HttpExtractionClient {
    pub fn new(url: &str) -> Self {
        tracing::info!(url = %url, "Extraction service configured");
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl ExtractionCollaborator for HttpExtractionClient {
    async fn reextract(&self, request: &ReextractionRequest) -> Result<Vec<NewFact>, ExtractionError> {
        tracing::debug!(
            url = %self.url,
            domain = %request.domain,
            attempt = request.attempt,
            missing_items = request.guidance.missing_items.len(),
            "Requesting targeted re-extraction"
        );

        let response = self.client.post(&self.url).json(request).send().await?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ExtractionError::Unavailable(self.url.clone()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::ParseError(format!(
                "Unexpected status {}: {}",
                status, body
            )));
        }

        let parsed: ReextractionResponse = response.json().await.map_err(|e| {
            ExtractionError::ParseError(format!("Failed to deserialize facts: {}", e))
        })?;

        // Facts for other domains are not part of a targeted request
        Ok(parsed
            .facts
            .into_iter()
            .filter(|f| f.domain == request.domain)
            .collect())
    }
}
