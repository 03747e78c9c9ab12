use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use super::types::{GenerateRequest, GenerateResponse, Message};
use super::Generator;
use crate::config::{GenerationConfig, RequestConfig};
use crate::error::{GenerationError, GenerationResult};

/// Client for a Workers-AI style model run endpoint
#[derive(Clone)]
pub struct GenerationClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_ms: u64,
}

impl GenerationClient {
    /// Create a new generation client
    pub fn new(config: &GenerationConfig, request_config: &RequestConfig) -> GenerationResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(request_config.timeout_ms))
            .build()
            .map_err(GenerationError::Http)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout_ms: request_config.timeout_ms,
        })
    }

    /// Run the configured model once
    pub async fn run(&self, request: &GenerateRequest) -> GenerationResult<String> {
        let url = format!("{}/ai/run/{}", self.base_url, self.model);
        let start = Instant::now();

        debug!(
            model = %self.model,
            messages = request.messages.len(),
            "Calling generation endpoint"
        );

        let result = self.execute_request(&url, request).await;
        let latency = start.elapsed();

        match &result {
            Ok(text) => info!(
                model = %self.model,
                latency_ms = latency.as_millis(),
                chars = text.len(),
                "Generation call succeeded"
            ),
            Err(e) => warn!(
                model = %self.model,
                error = %e,
                transient = e.is_transient(),
                latency_ms = latency.as_millis(),
                "Generation call failed"
            ),
        }

        result
    }

    /// Execute a single request (internal)
    async fn execute_request(
        &self,
        url: &str,
        request: &GenerateRequest,
    ) -> GenerationResult<String> {
        let response = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout {
                        timeout_ms: self.timeout_ms,
                    }
                } else {
                    GenerationError::Http(e)
                }
            })?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api {
                status: status.as_u16(),
                message: error_body,
            });
        }

        let body: GenerateResponse =
            response
                .json()
                .await
                .map_err(|e| GenerationError::InvalidResponse {
                    message: format!("Failed to parse response: {}", e),
                })?;

        if !body.success {
            return Err(GenerationError::InvalidResponse {
                message: body.error_summary(),
            });
        }

        body.text()
            .map(str::to_string)
            .ok_or(GenerationError::EmptyResponse)
    }

    /// Get the base URL (for testing)
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the configured model
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl Generator for GenerationClient {
    async fn generate(&self, messages: &[Message]) -> GenerationResult<String> {
        let request = GenerateRequest::new(messages.to_vec()).with_max_tokens(512);
        self.run(&request).await
    }
}
