use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::{Candidate, Field, PartialRecord, SourceId};
use crate::sources::{ensure_success, http_client, read_json, SourceClient};

const EXECUTIVE_POSITIONS: &[&str] = &[
    "ceo",
    "fondateur",
    "founder",
    "directeur",
    "directrice",
    "président",
    "president",
    "owner",
    "gérant",
    "manager",
];

#[derive(Debug, Default, Deserialize)]
pub struct DomainSearchResponse {
    pub data: Option<DomainSearchData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DomainSearchData {
    #[serde(default)]
    pub emails: Vec<HunterEmail>,
    pub linkedin: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HunterEmail {
    pub value: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub position: Option<String>,
    pub linkedin: Option<String>,
    pub phone_number: Option<String>,
}

impl HunterEmail {
    fn full_name(&self) -> Option<String> {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or_default(),
            self.last_name.as_deref().unwrap_or_default()
        );
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }

    fn is_executive(&self) -> bool {
        let position = self.position.as_deref().unwrap_or_default().to_lowercase();
        EXECUTIVE_POSITIONS.iter().any(|p| position.contains(p))
    }
}

/// Contact-enrichment source B: domain email search.
pub struct HunterClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HunterClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn domain_search(&self, domain: &str) -> Result<DomainSearchData, SourceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/v2/domain-search", self.base_url),
            &[
                ("domain", domain),
                ("api_key", self.api_key.as_str()),
                ("seniority", "executive"),
                ("limit", "10"),
            ],
        )
        .map_err(|e| SourceError::Parse(format!("Failed to build URL: {}", e)))?;

        // Redact key from logs
        tracing::debug!(
            "Hunter URL: {}/v2/domain-search?domain={}&api_key=[REDACTED]",
            self.base_url,
            domain
        );

        let response = self.client.get(url).send().await?;
        let response = ensure_success(response).await?;
        let result: DomainSearchResponse = read_json(response).await?;
        Ok(result.data.unwrap_or_default())
    }
}

/// Executive first, then any named person, then whatever address is left.
pub fn pick_contact(emails: &[HunterEmail]) -> Option<&HunterEmail> {
    let usable = || emails.iter().filter(|e| e.value.as_deref().is_some_and(|v| !v.trim().is_empty()));
    usable()
        .find(|e| e.is_executive() && e.full_name().is_some())
        .or_else(|| usable().find(|e| e.full_name().is_some()))
        .or_else(|| usable().find(|e| e.kind.as_deref() == Some("personal")))
        .or_else(|| usable().next())
}

pub fn to_partial_record(data: &DomainSearchData) -> PartialRecord {
    let mut record = PartialRecord::new(SourceId::Hunter)
        .with_opt_text(Field::LinkedinCompany, data.linkedin.clone());
    if let Some(contact) = pick_contact(&data.emails) {
        record = record
            .with_opt_text(Field::Email, contact.value.clone())
            .with_opt_text(Field::PersonName, contact.full_name())
            .with_opt_text(Field::PersonTitle, contact.position.clone())
            .with_opt_text(Field::LinkedinPerson, contact.linkedin.clone())
            .with_opt_text(Field::Phone, contact.phone_number.clone());
    }
    record
}

#[async_trait]
impl SourceClient for HunterClient {
    fn id(&self) -> SourceId {
        SourceId::Hunter
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        let Some(domain) = candidate.domain() else {
            tracing::debug!("Hunter skipped for {}: no domain", candidate.company_name);
            return Ok(None);
        };

        let data = self.domain_search(&domain).await?;
        let record = to_partial_record(&data);
        if record.is_empty() {
            return Ok(None);
        }

        tracing::info!(
            "✓ Hunter: {} for {}",
            record.text(Field::Email).unwrap_or("no email"),
            domain
        );
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email(value: &str, first: Option<&str>, position: Option<&str>) -> HunterEmail {
        HunterEmail {
            value: Some(value.to_string()),
            first_name: first.map(str::to_string),
            last_name: first.map(|_| "Dupont".to_string()),
            position: position.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_executive_is_preferred() {
        let emails = vec![
            email("info@acme.ch", None, None),
            email("paul@acme.ch", Some("Paul"), Some("Comptable")),
            email("jean@acme.ch", Some("Jean"), Some("CEO")),
        ];
        assert_eq!(pick_contact(&emails).unwrap().value.as_deref(), Some("jean@acme.ch"));
    }

    #[test]
    fn test_named_person_before_generic() {
        let emails = vec![
            email("info@acme.ch", None, None),
            email("paul@acme.ch", Some("Paul"), Some("Comptable")),
        ];
        assert_eq!(pick_contact(&emails).unwrap().value.as_deref(), Some("paul@acme.ch"));
    }

    #[test]
    fn test_generic_fallback() {
        let emails = vec![email("info@acme.ch", None, None)];
        let record = to_partial_record(&DomainSearchData {
            emails,
            linkedin: None,
        });
        assert_eq!(record.text(Field::Email), Some("info@acme.ch"));
        assert!(record.get(Field::PersonName).is_none());
    }
}
