//! Scoring backend contract, HTTP chat backend, and retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ScoreRequest;

/// Failure modes a backend can report. Rate limiting is retryable against the
/// same backend; anything else advances the chain.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("backend rate limited")]
    RateLimited,
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// One scoring service in the chain. Implementations return the raw response
/// text; parsing is the orchestrator's job.
#[async_trait]
pub trait ScoreBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn evaluate(&self, request: &ScoreRequest) -> Result<String, BackendError>;
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

pub fn classify_status(status: StatusCode) -> BackendError {
    if status == StatusCode::TOO_MANY_REQUESTS {
        BackendError::RateLimited
    } else {
        BackendError::Unavailable(format!("http status {status}"))
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackendConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    pub max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

/// Chat-completion scoring backend (OpenRouter-style API surface).
pub struct HttpBackend {
    config: HttpBackendConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: HttpBackendConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("building http client: {e}")))?;
        Ok(Self { config, client })
    }

    fn prompt(request: &ScoreRequest) -> String {
        format!(
            "You match a candidate profile against a job listing.\n\
             Respond with ONLY a JSON object: \
             {{\"score\": <integer 0-100>, \"matched\": [..], \"unmatched\": [..], \
             \"key_points\": [..]}}.\n\
             matched/unmatched are the listing requirements the candidate does/does not \
             satisfy; key_points are short rationale bullets.\n\n\
             CANDIDATE PROFILE:\n{}\n\n\
             JOB TITLE: {}\n\n\
             JOB DESCRIPTION:\n{}\n\n\
             JOB REQUIREMENTS:\n{}",
            request.profile_text,
            request.listing_title,
            request.listing_description,
            request.listing_requirements,
        )
    }
}

#[async_trait]
impl ScoreBackend for HttpBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn evaluate(&self, request: &ScoreRequest) -> Result<String, BackendError> {
        let payload = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage { role: "user", content: Self::prompt(request) }],
            max_tokens: self.config.max_tokens,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Unavailable(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| BackendError::Unavailable(format!("reading response body: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| BackendError::Unavailable("response had no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(350));
    }

    #[test]
    fn status_classification_separates_rate_limits() {
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            BackendError::RateLimited
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            BackendError::Unavailable(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::UNAUTHORIZED),
            BackendError::Unavailable(_)
        ));
    }
}
