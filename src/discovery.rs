//! Candidate discovery: places search first, then the search engine, with
//! relevance exclusions and in-batch deduplication.
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::errors::SourceError;
use crate::models::{Candidate, IdentityKey, Locale};
use crate::sources::DiscoverySource;

/// Aggregator and marketplace sites that never are a local business' own site.
const EXCLUDED_DOMAINS: &[&str] = &[
    "accor.com", "booking.com", "expedia.com", "tripadvisor.com", "airbnb.com", "trivago.com",
    "agoda.com", "hotels.com", "groupon.com", "uber.com", "deliveroo.com", "justeat.com",
];

/// URL fragments typical of a group's per-location landing pages.
const EXCLUDED_URL_PATTERNS: &[&str] = &[
    "/restaurant-", "/hotel-", "/shop-", "/store-", "/location-", "/fr/restaurant", "/fr/hotel",
    "/en/restaurant", "/en/hotel",
];

const REAL_ESTATE: &[&str] = &[
    "immobilier", "immobilière", "real estate", "homegate", "immoscout", "immoweb",
];

/// Large chains, marketplaces, banks, telecoms and subsidiaries.
const LARGE_COMPANIES: &[&str] = &[
    "coop", "migros", "denner", "aldi", "lidl", "manor", "globus", "galaxus", "digitec", "amazon",
    "booking", "trivago", "expedia", "comparis", "ricardo", "anibis", "accor", "tripadvisor",
    "airbnb", "marriott", "hilton", "hyatt", "novotel", "ibis", "mercure", "sofitel", "mcdonald",
    "burger king", "kfc", "subway", "pizza hut", "domino", "starbucks", "nespresso",
    "pret a manger", "zara", "h&m", "mango", "bershka", "pull & bear", "stradivarius", "c&a",
    "primark", "ikea", "conforama", "pfister", "micasa", "media markt", "fnac", "saturn",
    "darty", "ubs", "credit suisse", "raiffeisen", "postfinance", "swisscom", "sunrise",
    "orange", "salt", "nike", "adidas", "puma", "decathlon", "interdiscount", "interio",
    "filiale", "succursale", "subsidiary",
];

const GOVERNMENT: &[&str] = &["ville-", "commune-", "administration", "canton", "ge.ch", "admin.ch", ".gov"];

const MEDIA: &[&str] = &[
    "rts.ch", "24heures", "lematin", "20min", "letemps", "tdg.ch", "blick", "srf.ch", "nzz",
];

/// Tokens this short only match as whole words ("ubs" must not hit "clubs").
const SHORT_TOKEN: usize = 5;

fn contains_token(haystack: &str, token: &str) -> bool {
    if token.chars().count() > SHORT_TOKEN || !token.chars().all(|c| c.is_alphanumeric()) {
        return haystack.contains(token);
    }
    haystack
        .split(|c: char| !c.is_alphanumeric())
        .any(|word| word == token)
}

/// Drops candidates that are not independent local businesses.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    extra_keywords: Vec<String>,
}

impl ExclusionFilter {
    pub fn new(extra_keywords: Vec<String>) -> Self {
        Self {
            extra_keywords: extra_keywords
                .into_iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// Reason the candidate is excluded, if it is.
    pub fn exclusion_reason(&self, candidate: &Candidate) -> Option<&'static str> {
        let name = candidate.company_name.to_lowercase();
        let site = candidate.website.as_deref().unwrap_or_default().to_lowercase();
        let text = format!("{} {}", name, site);

        if EXCLUDED_DOMAINS.iter().any(|d| site.contains(d))
            || EXCLUDED_URL_PATTERNS.iter().any(|p| site.contains(p))
        {
            return Some("aggregator");
        }
        if REAL_ESTATE.iter().any(|w| text.contains(w)) {
            return Some("real-estate");
        }
        if LARGE_COMPANIES.iter().any(|w| contains_token(&text, w)) {
            return Some("large-company");
        }
        if GOVERNMENT.iter().any(|w| contains_token(&text, w)) {
            return Some("government");
        }
        if MEDIA.iter().any(|w| contains_token(&text, w)) {
            return Some("media");
        }
        if self.extra_keywords.iter().any(|w| contains_token(&text, w)) {
            return Some("configured-keyword");
        }
        None
    }

    pub fn accepts(&self, candidate: &Candidate) -> bool {
        match self.exclusion_reason(candidate) {
            Some(reason) => {
                tracing::debug!("Excluded {} ({})", candidate.company_name, reason);
                false
            }
            None => true,
        }
    }
}

/// Discovery over several providers, consulted in order.
pub struct CompositeDiscovery {
    sources: Vec<Arc<dyn DiscoverySource>>,
    filter: ExclusionFilter,
}

impl CompositeDiscovery {
    pub fn new(sources: Vec<Arc<dyn DiscoverySource>>, filter: ExclusionFilter) -> Self {
        Self { sources, filter }
    }
}

#[async_trait]
impl DiscoverySource for CompositeDiscovery {
    fn name(&self) -> &'static str {
        "composite"
    }

    /// Fetch up to `limit` distinct, relevant candidates.
    ///
    /// A failing provider is logged and skipped; the error is returned only
    /// when every provider failed.
    async fn search(
        &self,
        sector: &str,
        locale: &Locale,
        limit: usize,
    ) -> Result<Vec<Candidate>, SourceError> {
        let mut batch: Vec<Candidate> = Vec::new();
        let mut seen: Vec<IdentityKey> = Vec::new();
        let mut last_error = None;
        let mut answered = 0usize;

        for source in &self.sources {
            if batch.len() >= limit {
                break;
            }
            let found = match source.search(sector, locale, limit).await {
                Ok(found) => {
                    answered += 1;
                    found
                }
                Err(e) => {
                    tracing::warn!("Discovery via {} failed ({}): {}", source.name(), e.error_kind(), e);
                    last_error = Some(e);
                    continue;
                }
            };

            for candidate in found {
                if batch.len() >= limit {
                    break;
                }
                if candidate.company_name.is_empty() || !self.filter.accepts(&candidate) {
                    continue;
                }
                let identity = candidate.identity();
                if seen.iter().any(|known| known.matches(&identity)) {
                    continue;
                }
                seen.push(identity);
                batch.push(candidate);
            }
        }

        match last_error {
            Some(e) if answered == 0 => Err(e),
            _ => {
                let names: HashSet<&str> = batch.iter().map(|c| c.discovery_source.as_str()).collect();
                tracing::info!(
                    "Discovery for '{}' in {}: {} candidates (via {:?})",
                    sector,
                    locale,
                    batch.len(),
                    names
                );
                Ok(batch)
            }
        }
    }
}
