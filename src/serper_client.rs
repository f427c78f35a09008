use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::{Candidate, Field, Locale, PartialRecord, SourceId};
use crate::normalize::normalize_company_name;
use crate::sources::{ensure_success, http_client, read_json, DiscoverySource, SourceClient, SourceRole};

/// Sites that are never a prospect's own website.
const DIRECTORY_SITES: &[&str] = &[
    "wikipedia.org",
    "facebook.com",
    "linkedin.com",
    "instagram.com",
    "twitter.com",
    "x.com",
    "youtube.com",
    "tripadvisor.",
    "booking.com",
    "yelp.",
    "local.ch",
    "search.ch",
    "pagesjaunes.fr",
    "google.",
];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    q: &'a str,
    num: usize,
    gl: &'a str,
    hl: &'a str,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub organic: Vec<OrganicResult>,
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct OrganicResult {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub snippet: String,
}

/// Google country/language codes for a configured country.
fn locale_codes(country: &str) -> (&'static str, &'static str) {
    match country.trim().to_lowercase().as_str() {
        "suisse" | "switzerland" | "ch" => ("ch", "fr"),
        "france" | "fr" => ("fr", "fr"),
        "belgique" | "belgium" | "be" => ("be", "fr"),
        "deutschland" | "germany" | "de" => ("de", "de"),
        "canada" | "ca" => ("ca", "fr"),
        _ => ("us", "en"),
    }
}

/// Company name from a result title (`"Acme SA - Boulangerie | Genève"` -> `"Acme SA"`).
pub fn company_name_from_title(title: &str) -> String {
    title
        .split(" - ")
        .next()
        .unwrap_or(title)
        .split(" | ")
        .next()
        .unwrap_or(title)
        .split(" – ")
        .next()
        .unwrap_or(title)
        .trim()
        .to_string()
}

fn is_directory_site(link: &str) -> bool {
    let lower = link.to_lowercase();
    DIRECTORY_SITES.iter().any(|d| lower.contains(d))
}

/// Pick the LinkedIn company page whose title matches the company; else the first one.
pub fn pick_linkedin_company(results: &[OrganicResult], company_name: &str) -> Option<String> {
    let pages: Vec<&OrganicResult> = results
        .iter()
        .filter(|r| r.link.contains("linkedin.com/company"))
        .collect();
    let wanted: String = normalize_company_name(company_name)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .take(5)
        .collect();
    let matches_name = |r: &&&OrganicResult| {
        let title: String = normalize_company_name(&r.title)
            .chars()
            .filter(|c| c.is_alphanumeric())
            .collect();
        !wanted.is_empty() && title.contains(&wanted)
    };
    pages
        .iter()
        .find(matches_name)
        .or_else(|| pages.first())
        .map(|r| r.link.split('?').next().unwrap_or(&r.link).to_string())
}

/// Search-engine source: organic discovery and LinkedIn company guesses.
pub struct SerperClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl SerperClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn search_web(
        &self,
        query: &str,
        num: usize,
        country: &str,
    ) -> Result<Vec<OrganicResult>, SourceError> {
        let (gl, hl) = locale_codes(country);
        let body = SearchRequest {
            q: query,
            num,
            gl,
            hl,
        };

        tracing::debug!("Serper search: '{}'", query);

        let response = self
            .client
            .post(format!("{}/search", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .json(&body)
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let result: SearchResponse = read_json(response).await?;
        Ok(result.organic)
    }
}

#[async_trait]
impl SourceClient for SerperClient {
    fn id(&self) -> SourceId {
        SourceId::Search
    }

    fn role(&self) -> SourceRole {
        SourceRole::Enrichment
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        let query = format!(
            "\"{}\" {} site:linkedin.com/company",
            candidate.company_name, candidate.locale.city
        );
        let results = self.search_web(&query, 5, &candidate.locale.country).await?;
        let Some(linkedin) = pick_linkedin_company(&results, &candidate.company_name) else {
            return Ok(None);
        };

        tracing::info!("✓ LinkedIn guess for {}: {}", candidate.company_name, linkedin);
        Ok(Some(
            PartialRecord::new(SourceId::Search).with_text(Field::LinkedinCompany, linkedin),
        ))
    }
}

#[async_trait]
impl DiscoverySource for SerperClient {
    fn name(&self) -> &'static str {
        "search"
    }

    async fn search(
        &self,
        sector: &str,
        locale: &Locale,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        let query = format!(
            "\"{}\" {} {} -site:linkedin.com -site:facebook.com -site:wikipedia.org",
            sector, locale.city, locale.country
        );
        let results = self.search_web(&query, limit, &locale.country).await?;

        let candidates: Vec<Candidate> = results
            .into_iter()
            .filter(|r| !r.link.is_empty() && !is_directory_site(&r.link))
            .filter_map(|r| {
                let name = company_name_from_title(&r.title);
                if name.is_empty() || name.chars().count() > 100 {
                    return None;
                }
                Some(Candidate::new(name, Some(r.link), locale.clone(), "search"))
            })
            .take(limit)
            .collect();

        tracing::info!("Search discovery: {} candidates for '{}'", candidates.len(), sector);
        Ok(candidates)
    }
}
