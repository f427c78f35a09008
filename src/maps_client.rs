use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::errors::SourceError;
use crate::models::{Candidate, Field, FieldData, Locale, PartialRecord, Quality, SourceId};
use crate::sources::{ensure_success, http_client, read_json, DiscoverySource, SourceClient, SourceRole};

const DETAIL_FIELDS: &str = "name,formatted_address,formatted_phone_number,international_phone_number,website,rating,user_ratings_total,opening_hours,types,url,business_status";

#[derive(Debug, Default, Deserialize)]
pub struct TextSearchResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub results: Vec<PlaceSummary>,
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaceSummary {
    pub place_id: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DetailsResponse {
    #[serde(default)]
    pub status: String,
    pub result: Option<PlaceDetails>,
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PlaceDetails {
    pub name: Option<String>,
    pub formatted_address: Option<String>,
    pub formatted_phone_number: Option<String>,
    pub international_phone_number: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub user_ratings_total: Option<u32>,
    pub opening_hours: Option<OpeningHours>,
    #[serde(default)]
    pub types: Vec<String>,
    pub business_status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OpeningHours {
    #[serde(default)]
    pub weekday_text: Vec<String>,
}

/// Maps the Places API `status` field onto the source error taxonomy.
///
/// `Ok(false)` means a well-formed empty answer.
fn check_places_status(status: &str, error_message: Option<&str>) -> Result<bool, SourceError> {
    let detail = || format!("{} {}", status, error_message.unwrap_or_default());
    match status {
        "OK" => Ok(true),
        "ZERO_RESULTS" | "NOT_FOUND" => Ok(false),
        "OVER_QUERY_LIMIT" => Err(SourceError::RateLimited(detail())),
        "REQUEST_DENIED" => Err(SourceError::Auth(detail())),
        "UNKNOWN_ERROR" => Err(SourceError::TransientNetwork(detail())),
        _ => Err(SourceError::Parse(detail())),
    }
}

/// Local-business source: verified phone, address, reviews, hours.
///
/// Also serves as the first discovery provider.
pub struct MapsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl MapsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: http_client(timeout),
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    pub async fn text_search(&self, query: &str) -> Result<Vec<PlaceSummary>, SourceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/textsearch/json", self.base_url),
            &[("query", query), ("key", self.api_key.as_str()), ("language", "fr")],
        )
        .map_err(|e| SourceError::Parse(format!("Failed to build URL: {}", e)))?;

        tracing::debug!("Places text search: '{}'", query);

        let response = ensure_success(self.client.get(url).send().await?).await?;
        let result: TextSearchResponse = read_json(response).await?;
        if !check_places_status(&result.status, result.error_message.as_deref())? {
            return Ok(Vec::new());
        }
        Ok(result.results)
    }

    pub async fn details(&self, place_id: &str) -> Result<Option<PlaceDetails>, SourceError> {
        let url = reqwest::Url::parse_with_params(
            &format!("{}/details/json", self.base_url),
            &[
                ("place_id", place_id),
                ("key", self.api_key.as_str()),
                ("language", "fr"),
                ("fields", DETAIL_FIELDS),
            ],
        )
        .map_err(|e| SourceError::Parse(format!("Failed to build URL: {}", e)))?;

        let response = ensure_success(self.client.get(url).send().await?).await?;
        let result: DetailsResponse = read_json(response).await?;
        if !check_places_status(&result.status, result.error_message.as_deref())? {
            return Ok(None);
        }
        Ok(result.result)
    }
}

/// Places report a phone number the business itself maintains: it is verified.
pub fn to_partial_record(details: &PlaceDetails, source: SourceId) -> PartialRecord {
    let phone = details
        .international_phone_number
        .clone()
        .or_else(|| details.formatted_phone_number.clone());
    let quality = if source == SourceId::Maps {
        Quality::Verified
    } else {
        Quality::Unverified
    };

    let mut record = PartialRecord::new(source)
        .with_opt_text(Field::Website, details.website.clone())
        .with_opt_text(Field::Address, details.formatted_address.clone());
    if let Some(phone) = phone {
        record.set(Field::Phone, FieldData::Text(phone.trim().to_string()), quality);
    }
    if let Some(rating) = details.rating {
        record.set(Field::Rating, FieldData::Number(rating), Quality::Verified);
    }
    if let Some(count) = details.user_ratings_total {
        record.set(Field::ReviewCount, FieldData::Count(count), Quality::Verified);
    }
    if let Some(hours) = details.opening_hours.as_ref().filter(|h| !h.weekday_text.is_empty()) {
        record = record.with_text(Field::OpeningHours, hours.weekday_text.join("; "));
    }
    if source == SourceId::Maps {
        let industry = details
            .types
            .iter()
            .find(|t| !matches!(t.as_str(), "point_of_interest" | "establishment" | "store" | "food"));
        record = record.with_opt_text(Field::Industry, industry.cloned());
    }
    record
}

/// Permanently closed places are not prospects.
fn is_operational(details: &PlaceDetails) -> bool {
    !matches!(details.business_status.as_deref(), Some("CLOSED_PERMANENTLY"))
}

#[async_trait]
impl SourceClient for MapsClient {
    fn id(&self) -> SourceId {
        SourceId::Maps
    }

    fn role(&self) -> SourceRole {
        SourceRole::Enrichment
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        let query = format!(
            "{} {} {}",
            candidate.company_name, candidate.locale.city, candidate.locale.country
        );
        let places = self.text_search(query.trim()).await?;
        let Some(place_id) = places.into_iter().find_map(|p| p.place_id) else {
            return Ok(None);
        };
        let Some(details) = self.details(&place_id).await? else {
            return Ok(None);
        };

        let record = to_partial_record(&details, SourceId::Maps);
        tracing::info!(
            "✓ Maps: {} (rating {:?}, {:?} reviews)",
            details.name.as_deref().unwrap_or(&candidate.company_name),
            details.rating,
            details.user_ratings_total
        );
        Ok(Some(record))
    }
}

#[async_trait]
impl DiscoverySource for MapsClient {
    fn name(&self) -> &'static str {
        "maps"
    }

    async fn search(
        &self,
        sector: &str,
        locale: &Locale,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        let query = format!("{} {} {}", sector, locale.city, locale.country);
        let places = self.text_search(query.trim()).await?;

        let mut candidates = Vec::new();
        for place in places.into_iter().take(limit) {
            let Some(place_id) = place.place_id else {
                continue;
            };
            // One failed detail call should not lose the whole batch
            let details = match self.details(&place_id).await {
                Ok(Some(details)) => details,
                Ok(None) => continue,
                Err(e @ (SourceError::Auth(_) | SourceError::RateLimited(_))) => return Err(e),
                Err(e) => {
                    tracing::debug!("Places details failed for {}: {}", place_id, e);
                    continue;
                }
            };
            if !is_operational(&details) {
                continue;
            }
            let Some(name) = details.name.clone().or(place.name) else {
                continue;
            };
            let seed = to_partial_record(&details, SourceId::Discovery);
            candidates.push(
                Candidate::new(name, details.website.clone(), locale.clone(), "maps").with_seed(seed),
            );
        }

        tracing::info!("Maps discovery: {} candidates for '{}'", candidates.len(), query);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_places_status_mapping() {
        assert_eq!(check_places_status("OK", None), Ok(true));
        assert_eq!(check_places_status("ZERO_RESULTS", None), Ok(false));
        assert!(matches!(
            check_places_status("OVER_QUERY_LIMIT", None),
            Err(SourceError::RateLimited(_))
        ));
        assert!(matches!(
            check_places_status("REQUEST_DENIED", Some("bad key")),
            Err(SourceError::Auth(_))
        ));
    }

    #[test]
    fn test_details_to_record() {
        let details = PlaceDetails {
            name: Some("Café du Marché".into()),
            international_phone_number: Some("+41 22 310 12 34".into()),
            rating: Some(4.6),
            user_ratings_total: Some(212),
            types: vec!["cafe".into(), "food".into(), "establishment".into()],
            opening_hours: Some(OpeningHours {
                weekday_text: vec!["lundi: 07:00–19:00".into()],
            }),
            ..Default::default()
        };
        let record = to_partial_record(&details, SourceId::Maps);
        assert_eq!(record.get(Field::Phone).unwrap().quality, Quality::Verified);
        assert_eq!(record.get(Field::ReviewCount).unwrap().data, FieldData::Count(212));
        assert_eq!(record.text(Field::Industry), Some("cafe"));
        assert_eq!(record.text(Field::OpeningHours), Some("lundi: 07:00–19:00"));

        let seed = to_partial_record(&details, SourceId::Discovery);
        assert_eq!(seed.get(Field::Phone).unwrap().quality, Quality::Unverified);
        assert!(seed.get(Field::Industry).is_none());
    }
}
