//! Capability traits implemented by the provider clients.
//!
//! The orchestrator and the scheduler only see these traits, never a vendor
//! response shape.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::SourceError;
use crate::models::{Candidate, Locale, PartialRecord, Prospect, SourceId};

/// Position of a source relative to the early-stop rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    /// Gating contact source, skipped once the required fields are satisfied.
    Contact,
    /// Enrichment source, always attempted.
    Enrichment,
}

/// Result of consulting one source for one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceOutcome {
    Success(PartialRecord),
    /// Well-formed answer without usable data.
    Empty,
    Failure(SourceError),
    /// Not called at all.
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Required fields were already satisfied (contact sources only).
    EarlyStop,
    /// The source failed this candidate too many times in a row.
    Exhausted,
    CircuitOpen,
    /// Paused after the provider reported a rate limit.
    CoolingDown,
    Disabled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::EarlyStop => "early_stop",
            SkipReason::Exhausted => "exhausted",
            SkipReason::CircuitOpen => "circuit_open",
            SkipReason::CoolingDown => "cooling_down",
            SkipReason::Disabled => "disabled",
        }
    }
}

impl SourceOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, SourceOutcome::Success(_))
    }

    /// Short label for outcome summaries (`success(3)`, `failure:rate_limited`).
    pub fn label(&self) -> String {
        match self {
            SourceOutcome::Success(record) => format!("success({})", record.fields.len()),
            SourceOutcome::Empty => "empty".to_string(),
            SourceOutcome::Failure(e) => format!("failure:{}", e.error_kind()),
            SourceOutcome::Skipped(reason) => format!("skipped:{}", reason.as_str()),
        }
    }
}

/// A contact-enrichment, local-business, website or search source.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn id(&self) -> SourceId;

    fn role(&self) -> SourceRole {
        SourceRole::Contact
    }

    /// Look the candidate up. `Ok(None)` and an empty record both mean no data.
    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError>;
}

/// Finds new candidate companies.
#[async_trait]
pub trait DiscoverySource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        sector: &str,
        locale: &Locale,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedMessage {
    pub message: String,
    pub specific_point: String,
}

/// Why a company was picked and what to offer it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelevanceAnalysis {
    pub selection_reason: String,
    pub service_proposal: String,
}

impl RelevanceAnalysis {
    /// Static analysis used when the generator is missing or fails.
    pub fn fallback(service_offered: &str) -> Self {
        Self {
            selection_reason: fallback_selection_reason(service_offered),
            service_proposal: fallback_service_proposal(service_offered),
        }
    }
}

pub fn fallback_selection_reason(service_offered: &str) -> String {
    format!("PME locale qui pourrait bénéficier de {}", service_offered)
}

pub fn fallback_service_proposal(service_offered: &str) -> String {
    format!("Amélioration de leur présence digitale avec {}", service_offered)
}

/// Writes the outreach message and the relevance analysis for a merged Prospect.
#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate(&self, prospect: &Prospect) -> Result<GeneratedMessage, SourceError>;

    /// Explain why `prospect` fits `service_offered` and what to propose to it.
    async fn analyse(
        &self,
        prospect: &Prospect,
        service_offered: &str,
        sector: &str,
    ) -> Result<RelevanceAnalysis, SourceError>;
}

/// Deliverability verdict for a mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmailStatus {
    Valid,
    Invalid,
    CatchAll,
    Unknown,
}

impl EmailStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmailStatus::Valid => "valid",
            EmailStatus::Invalid => "invalid",
            EmailStatus::CatchAll => "catch-all",
            EmailStatus::Unknown => "unknown",
        }
    }

    /// Map a provider status label onto the four verdicts.
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_lowercase().replace('_', "-").as_str() {
            "valid" => EmailStatus::Valid,
            "invalid" | "spamtrap" | "abuse" | "do-not-mail" => EmailStatus::Invalid,
            "catch-all" | "accept-all" => EmailStatus::CatchAll,
            _ => EmailStatus::Unknown,
        }
    }
}

#[async_trait]
pub trait EmailVerifier: Send + Sync {
    async fn verify(&self, email: &str) -> Result<EmailStatus, SourceError>;
}

/// Turn a provider response into an error when its status is not a success.
pub async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, SourceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(SourceError::from_status(status, &body))
}

/// Decode a JSON body, classifying malformed payloads as parse errors.
pub async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, SourceError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(SourceError::from)
}

/// Shared HTTP client with the per-call timeout applied.
pub fn http_client(timeout: std::time::Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent("Mozilla/5.0 (compatible; prospect-agent/0.1)")
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Falling back to default HTTP client: {}", e);
            reqwest::Client::new()
        })
}
