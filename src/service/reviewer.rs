//! Semantic-review capability
//!
//! The reviewer is a black box: it receives an excerpt, the extracted items and
//! a checklist, and answers with structured JSON. Callers go through
//! [`review_as`], which bounds the call with a timeout and maps every failure
//! onto a [`ReviewOutcome`] so validation never fails because of the reviewer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;

use crate::model::{ReviewRequest, review::response_schema};

#[derive(Debug, thiserror::Error)]
pub enum ReviewerError {
    #[error("Semantic reviewer unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

/// Single-method interface to the semantic-review capability
#[async_trait]
pub trait SemanticReviewer: Send + Sync {
    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewerError>;
}

/// What a bounded review call produced
#[derive(Debug, Clone, PartialEq)]
pub enum ReviewOutcome<T> {
    Signal(T),
    /// Reviewer answered with nothing usable
    NoSignal,
    /// Reviewer timed out or failed; validation continues deterministic-only
    Degraded(String),
}

impl<T> ReviewOutcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ReviewOutcome::Degraded(_))
    }
}

/// Call the reviewer with a timeout and parse the answer into `T`
pub async fn review_as<T: DeserializeOwned>(
    reviewer: &dyn SemanticReviewer,
    request: &ReviewRequest,
    timeout: Duration,
) -> ReviewOutcome<T> {
    let start_time = Instant::now();
    let response = match tokio::time::timeout(timeout, reviewer.review(request)).await {
        Ok(Ok(value)) => value,
        Ok(Err(e)) => {
            tracing::warn!(
                mode = ?request.mode,
                domain = ?request.domain,
                category = ?request.category,
                error = %e,
                "Semantic review failed, falling back to deterministic checks"
            );
            return ReviewOutcome::Degraded(e.to_string());
        }
        Err(_) => {
            tracing::warn!(
                mode = ?request.mode,
                domain = ?request.domain,
                category = ?request.category,
                timeout_ms = timeout.as_millis(),
                "Semantic review timed out, falling back to deterministic checks"
            );
            return ReviewOutcome::Degraded(format!(
                "no answer within {} ms",
                timeout.as_millis()
            ));
        }
    };

    if response.is_null() {
        return ReviewOutcome::NoSignal;
    }

    match serde_json::from_value::<T>(response) {
        Ok(parsed) => {
            tracing::debug!(
                mode = ?request.mode,
                elapsed_ms = start_time.elapsed().as_millis(),
                "Semantic review completed"
            );
            ReviewOutcome::Signal(parsed)
        }
        Err(e) => {
            tracing::debug!(
                mode = ?request.mode,
                error = %e,
                "Malformed semantic review response treated as no signal"
            );
            ReviewOutcome::NoSignal
        }
    }
}

/// Reviewer used when no capability is configured; never adds signal
#[derive(Debug, Clone, Default)]
pub struct NoSignalReviewer;

#[async_trait]
impl SemanticReviewer for NoSignalReviewer {
    async fn review(&self, _request: &ReviewRequest) -> Result<serde_json::Value, ReviewerError> {
        Ok(serde_json::Value::Null)
    }
}

/// Remote reviewer speaking JSON over HTTP
///
/// The request body carries the review request plus the JSON schema the
/// answer must follow; the response body is the answer itself.
pub struct HttpSemanticReviewer {
    client: Client,
    url: String,
}

impl HttpSemanticReviewer {
    pub fn new(url: &str) -> Self {
        tracing::info!(url = %url, "Semantic reviewer configured");
        Self {
            client: Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl SemanticReviewer for HttpSemanticReviewer {
    async fn review(&self, request: &ReviewRequest) -> Result<serde_json::Value, ReviewerError> {
        let body = serde_json::json!({
            "request": request,
            "response_schema": response_schema(request.mode),
        });

        tracing::debug!(url = %self.url, mode = ?request.mode, items = request.extracted_items.len(), "Sending semantic review request");

        let response = self.client.post(&self.url).json(&body).send().await?;

        if response.status() == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(ReviewerError::Unavailable(self.url.clone()));
        }

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ReviewerError::ParseError(format!(
                "Unexpected status {}: {}",
                status, body
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ReviewerError::ParseError(format!("Failed to deserialize review: {}", e)))
    }
}
