//! Classifier backed by an external moderation HTTP service.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vmod_models::{JobId, MediaRef, ModerationResult};

use crate::classifier::{AnalysisContext, Classifier};
use crate::error::ClassifyError;

/// Configuration for the HTTP classifier.
#[derive(Debug, Clone)]
pub struct HttpClassifierConfig {
    /// Base URL of the moderation service
    pub base_url: String,
    /// Request timeout (the pool applies its own per-call timeout as well)
    pub timeout: Duration,
}

impl Default for HttpClassifierConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8001".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl HttpClassifierConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("CLASSIFIER_URL")
                .unwrap_or_else(|_| "http://localhost:8001".to_string()),
            timeout: Duration::from_secs(
                std::env::var("CLASSIFIER_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(300),
            ),
        }
    }
}

#[derive(Debug, Serialize)]
struct ClassifyRequest<'a> {
    job_id: &'a JobId,
    media_ref: &'a MediaRef,
    attempt: u32,
}

#[derive(Debug, Deserialize)]
struct ClassifyResponse {
    label: String,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
}

/// Client for a moderation service exposing `POST /classify`.
pub struct HttpClassifier {
    http: Client,
    config: HttpClassifierConfig,
}

impl HttpClassifier {
    pub fn new(config: HttpClassifierConfig) -> Result<Self, ClassifyError> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClassifyError::failed(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    /// Create from environment variables.
    pub fn from_env() -> Result<Self, ClassifyError> {
        Self::new(HttpClassifierConfig::from_env())
    }

    /// Check if the moderation service is healthy.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/health", self.config.base_url);

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => response
                .json::<HealthResponse>()
                .await
                .map(|h| h.status == "healthy" || h.status == "ok")
                .unwrap_or(false),
            Ok(response) => {
                warn!("Classifier health check failed: {}", response.status());
                false
            }
            Err(e) => {
                warn!("Classifier health check error: {}", e);
                false
            }
        }
    }

    async fn request(
        &self,
        media_ref: &MediaRef,
        ctx: &AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        let url = format!("{}/classify", self.config.base_url);
        debug!(job_id = %ctx.job_id, "Sending classification request to {}", url);

        let response = self
            .http
            .post(&url)
            .timeout(ctx.timeout)
            .json(&ClassifyRequest {
                job_id: &ctx.job_id,
                media_ref,
                attempt: ctx.attempt,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifyError::failed(format!(
                "moderation service returned {}: {}",
                status, body
            )));
        }

        // Range checks belong to the caller, which reports them as an
        // invalid result rather than a failed call.
        let body: ClassifyResponse = response.json().await.map_err(map_transport_error)?;
        Ok(ModerationResult {
            label: body.label,
            confidence: body.confidence,
        })
    }
}

fn map_transport_error(e: reqwest::Error) -> ClassifyError {
    if e.is_timeout() {
        ClassifyError::Timeout
    } else {
        ClassifyError::failed(e.to_string())
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(
        &self,
        media_ref: &MediaRef,
        ctx: AnalysisContext,
    ) -> Result<ModerationResult, ClassifyError> {
        let cancel = ctx.cancel.clone();
        tokio::select! {
            result = self.request(media_ref, &ctx) => {
                if result.is_ok() {
                    ctx.progress.report(100);
                }
                result
            }
            _ = cancel.cancelled() => Err(ClassifyError::Cancelled),
        }
    }
}
