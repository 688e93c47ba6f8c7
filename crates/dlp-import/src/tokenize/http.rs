//! Remote de-identification over HTTP.
//!
//! Request body:
//!
//! ```json
//! {"project": "acme", "items": [{"domain": {...}, "strategy": "mask", "keep_last": 4, "value": "..."}]}
//! ```
//!
//! Response body: `{"tokens": ["...", ...]}`, one token per item, in order.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{DeidService, DeidStrategy, TokenDomain, TokenRequest};
use crate::error::{MigrateError, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct TokenizeRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    project: Option<&'a str>,
    items: &'a [TokenRequest],
}

#[derive(Deserialize)]
struct TokenizeResponse {
    tokens: Vec<String>,
}

/// Client for an HTTP de-identification endpoint.
pub struct HttpDeidService {
    client: reqwest::Client,
    endpoint: String,
    project: Option<String>,
    api_token: Option<String>,
}

impl std::fmt::Debug for HttpDeidService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDeidService")
            .field("endpoint", &self.endpoint)
            .field("project", &self.project)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl HttpDeidService {
    pub fn new(
        endpoint: impl Into<String>,
        project: Option<String>,
        api_token: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(request_timeout)
            .build()
            .map_err(|e| MigrateError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            project,
            api_token,
        })
    }

    async fn call(&self, items: &[TokenRequest]) -> Result<Vec<String>> {
        let mut request = self.client.post(&self.endpoint).json(&TokenizeRequest {
            project: self.project.as_deref(),
            items,
        });
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MigrateError::deid_transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("service returned status={}: {}", status, body);
            return Err(if is_retryable_status(status.as_u16()) {
                MigrateError::deid_transient(message)
            } else {
                MigrateError::deid_fatal(message)
            });
        }

        let parsed: TokenizeResponse = response
            .json()
            .await
            .map_err(|e| MigrateError::deid_fatal(format!("malformed response: {}", e)))?;
        debug!("de-identified {} values via {}", parsed.tokens.len(), self.endpoint);
        Ok(parsed.tokens)
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}

#[async_trait]
impl DeidService for HttpDeidService {
    async fn tokenize(&self, requests: &[TokenRequest]) -> Result<Vec<String>> {
        if requests.is_empty() {
            return Ok(Vec::new());
        }
        self.call(requests).await
    }

    async fn health_check(&self) -> Result<()> {
        let check = [TokenRequest {
            domain: TokenDomain::Shared("health_check".into()),
            strategy: DeidStrategy::DeterministicToken,
            value: "health-check".into(),
        }];
        let tokens = self.call(&check).await?;
        if tokens.len() != 1 {
            return Err(MigrateError::deid_fatal(format!(
                "health check returned {} tokens for 1 value",
                tokens.len()
            )));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}
