use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SourceError;
use crate::sources::{ensure_success, http_client, read_json, EmailStatus, EmailVerifier};

#[derive(Debug, Deserialize)]
pub struct ValidateResponse {
    pub status: Option<String>,
    pub error: Option<String>,
}

/// Mailbox verification against the ZeroBounce validate endpoint.
pub struct ZeroBounceVerifier {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ZeroBounceVerifier {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }
}

#[async_trait]
impl EmailVerifier for ZeroBounceVerifier {
    async fn verify(&self, email: &str) -> Result<EmailStatus, SourceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v2/validate", self.base_url),
            &[("api_key", self.api_key.as_str()), ("email", email), ("ip_address", "")],
        )
        .map_err(|e| SourceError::Parse(format!("Failed to build URL: {}", e)))?;

        let response = ensure_success(self.client.get(url).send().await?).await?;
        let result: ValidateResponse = read_json(response).await?;

        // The API answers 200 with an `error` field for key and credit problems
        if let Some(error) = result.error {
            let lower = error.to_lowercase();
            return Err(if lower.contains("credit") {
                SourceError::RateLimited(error)
            } else if lower.contains("key") {
                SourceError::Auth(error)
            } else {
                SourceError::Parse(error)
            });
        }

        let status = result
            .status
            .map(|s| EmailStatus::from_provider(&s))
            .unwrap_or(EmailStatus::Unknown);
        tracing::debug!("Email {} verified as {}", email, status.as_str());
        Ok(status)
    }
}
