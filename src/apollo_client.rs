use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::{Candidate, Field, PartialRecord, SourceId};
use crate::normalize::is_valid_email;
use crate::sources::{ensure_success, http_client, read_json, SourceClient};

/// Titles searched for the decision maker, most senior first.
const DECISION_MAKER_TITLES: &[&str] = &[
    "ceo",
    "chief executive officer",
    "directeur général",
    "directrice générale",
    "fondateur",
    "founder",
    "président",
    "president",
    "gérant",
    "gérante",
    "owner",
    "directeur",
    "directrice",
    "managing director",
];

#[derive(Debug, Serialize)]
struct OrganizationSearchRequest<'a> {
    api_key: &'a str,
    q_keywords: String,
    per_page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    website_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    q_organization_locations: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct PeopleSearchRequest<'a> {
    api_key: &'a str,
    organization_ids: Vec<&'a str>,
    person_titles: &'a [&'a str],
    per_page: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct OrganizationSearchResponse {
    #[serde(default)]
    pub organizations: Vec<ApolloOrganization>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApolloOrganization {
    pub id: Option<String>,
    pub name: Option<String>,
    pub website_url: Option<String>,
    pub phone: Option<String>,
    pub phone_number: Option<String>,
    pub estimated_num_employees: Option<u64>,
    pub industry: Option<String>,
    pub annual_revenue_printed: Option<String>,
    pub estimated_annual_revenue: Option<Value>,
    pub linkedin_url: Option<String>,
    pub street_address: Option<String>,
    pub postal_code: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PeopleSearchResponse {
    #[serde(default)]
    pub people: Vec<ApolloPerson>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApolloPerson {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub title: Option<String>,
    pub email: Option<String>,
    pub linkedin_url: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<ApolloPhone>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ApolloPhone {
    pub raw_number: Option<String>,
}

/// Contact-enrichment source A: organization search plus decision-maker lookup.
pub struct ApolloClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl ApolloClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    /// Search the organization matching the candidate.
    ///
    /// A 422 is how the provider answers queries it cannot match; it is
    /// treated as no data.
    pub async fn search_organization(
        &self,
        candidate: &Candidate,
    ) -> Result<Option<ApolloOrganization>, SourceError> {
        let url = format!("{}/v1/organizations/search", self.base_url);
        let body = OrganizationSearchRequest {
            api_key: &self.api_key,
            q_keywords: candidate.company_name.chars().take(50).collect(),
            per_page: 5,
            website_url: candidate.domain(),
            q_organization_locations: Some(candidate.locale.city.as_str()).filter(|c| !c.is_empty()),
        };

        tracing::debug!("Apollo organization search for '{}'", candidate.company_name);

        let response = self
            .client
            .post(&url)
            .header("Cache-Control", "no-cache")
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            tracing::debug!("Apollo: query not processable for {} (422)", candidate.company_name);
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let result: OrganizationSearchResponse = read_json(response).await?;
        Ok(result.organizations.into_iter().next())
    }

    pub async fn search_decision_maker(
        &self,
        organization_id: &str,
    ) -> Result<Option<ApolloPerson>, SourceError> {
        let url = format!("{}/v1/mixed_people/search", self.base_url);
        let body = PeopleSearchRequest {
            api_key: &self.api_key,
            organization_ids: vec![organization_id],
            person_titles: DECISION_MAKER_TITLES,
            per_page: 5,
        };

        let response = self
            .client
            .post(&url)
            .header("Cache-Control", "no-cache")
            .json(&body)
            .send()
            .await?;

        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            return Ok(None);
        }

        let response = ensure_success(response).await?;
        let result: PeopleSearchResponse = read_json(response).await?;
        Ok(pick_decision_maker(result.people))
    }
}

/// Most senior person first, by position in the title list.
fn pick_decision_maker(people: Vec<ApolloPerson>) -> Option<ApolloPerson> {
    people
        .into_iter()
        .filter(|p| p.first_name.is_some() || p.last_name.is_some())
        .min_by_key(|p| {
            let title = p.title.as_deref().unwrap_or_default().to_lowercase();
            DECISION_MAKER_TITLES
                .iter()
                .position(|t| title.contains(t))
                .unwrap_or(DECISION_MAKER_TITLES.len())
        })
}

/// Employee count bucketed into a size band.
pub fn size_band(employees: u64) -> &'static str {
    match employees {
        0..=10 => "1-10",
        11..=50 => "11-50",
        51..=200 => "51-200",
        201..=500 => "201-500",
        501..=1000 => "501-1000",
        _ => "1000+",
    }
}

fn revenue_label(org: &ApolloOrganization) -> Option<String> {
    if let Some(printed) = org.annual_revenue_printed.as_deref().filter(|s| !s.trim().is_empty()) {
        return Some(printed.to_string());
    }
    match org.estimated_annual_revenue.as_ref()? {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn format_address(org: &ApolloOrganization) -> Option<String> {
    let parts: Vec<&str> = [&org.street_address, &org.postal_code, &org.city, &org.country]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

/// Map the provider's organization and person onto a PartialRecord.
pub fn to_partial_record(org: &ApolloOrganization, person: Option<&ApolloPerson>) -> PartialRecord {
    let mut record = PartialRecord::new(SourceId::Apollo)
        .with_opt_text(Field::Website, org.website_url.clone())
        .with_opt_text(Field::Phone, org.phone_number.clone().or_else(|| org.phone.clone()))
        .with_opt_text(Field::CompanySize, org.estimated_num_employees.map(size_band))
        .with_opt_text(Field::Industry, org.industry.clone())
        .with_opt_text(Field::Revenue, revenue_label(org))
        .with_opt_text(Field::Address, format_address(org))
        .with_opt_text(Field::LinkedinCompany, org.linkedin_url.clone());

    if let Some(person) = person {
        let name = format!(
            "{} {}",
            person.first_name.as_deref().unwrap_or_default(),
            person.last_name.as_deref().unwrap_or_default()
        );
        // Locked emails come back as placeholders (email_not_unlocked@domain.com)
        let email = person
            .email
            .clone()
            .filter(|e| !e.contains("not_unlocked") && is_valid_email(e));
        record = record
            .with_text(Field::PersonName, name)
            .with_opt_text(Field::PersonTitle, person.title.clone())
            .with_opt_text(Field::Email, email)
            .with_opt_text(Field::LinkedinPerson, person.linkedin_url.clone());
        if record.get(Field::Phone).is_none() {
            let direct = person.phone_numbers.iter().find_map(|p| p.raw_number.clone());
            record = record.with_opt_text(Field::Phone, direct);
        }
    }

    record
}

#[async_trait]
impl SourceClient for ApolloClient {
    fn id(&self) -> SourceId {
        SourceId::Apollo
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        let Some(org) = self.search_organization(candidate).await? else {
            return Ok(None);
        };

        let person = match org.id.as_deref() {
            Some(id) => match self.search_decision_maker(id).await {
                Ok(person) => person,
                Err(e @ SourceError::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        "Apollo people search failed for {}, keeping organization data: {}",
                        candidate.company_name,
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let record = to_partial_record(&org, person.as_ref());
        tracing::info!(
            "✓ Apollo: {} fields for {}",
            record.fields.len(),
            org.name.as_deref().unwrap_or(&candidate.company_name)
        );
        Ok(Some(record))
    }
}
