use std::time::Duration;

use crate::merger::PrecedenceTable;
use crate::models::SourceId;
use crate::orchestrator::RequiredFields;
use crate::scoring::ScoreWeights;

/// API keys and endpoints of the external providers.
#[derive(Clone)]
pub struct ProviderSettings {
    pub serper_api_key: String,
    pub serper_base_url: String,
    pub hunter_api_key: Option<String>,
    pub hunter_base_url: String,
    pub apollo_api_key: Option<String>,
    pub apollo_base_url: String,
    pub google_maps_api_key: Option<String>,
    pub google_maps_base_url: String,
    pub openai_api_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: String,
    pub zerobounce_api_key: Option<String>,
    pub zerobounce_base_url: String,
}

fn redact(key: &Option<String>) -> &'static str {
    if key.is_some() {
        "<redacted>"
    } else {
        "<unset>"
    }
}

impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("serper_api_key", &"<redacted>")
            .field("serper_base_url", &self.serper_base_url)
            .field("hunter_api_key", &redact(&self.hunter_api_key))
            .field("hunter_base_url", &self.hunter_base_url)
            .field("apollo_api_key", &redact(&self.apollo_api_key))
            .field("apollo_base_url", &self.apollo_base_url)
            .field("google_maps_api_key", &redact(&self.google_maps_api_key))
            .field("google_maps_base_url", &self.google_maps_base_url)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("openai_base_url", &self.openai_base_url)
            .field("openai_model", &self.openai_model)
            .field("zerobounce_api_key", &redact(&self.zerobounce_api_key))
            .field("zerobounce_base_url", &self.zerobounce_base_url)
            .finish()
    }
}

/// What to look for and how to pitch it.
#[derive(Debug, Clone)]
pub struct Targeting {
    pub sector: String,
    pub service_offered: String,
    pub city: String,
    pub country: String,
    /// Business types used as rotating discovery queries.
    pub targets: Vec<String>,
    pub discovery_limit: usize,
    pub message_template: String,
    pub value_proposition: String,
    pub excluded_keywords: Vec<String>,
}

/// Pipeline policy: chain order, early-stop predicate, precedence, pacing.
#[derive(Debug, Clone)]
pub struct PipelinePolicy {
    pub processing_interval: Duration,
    pub source_timeout: Duration,
    pub max_candidate_attempts: u32,
    pub max_source_failures: u32,
    pub discovery_backoff_base: Duration,
    pub discovery_backoff_max: Duration,
    pub source_chain: Vec<SourceId>,
    pub required_fields: RequiredFields,
    pub precedence: PrecedenceTable,
    pub score_weights: ScoreWeights,
    pub min_rating: f64,
    pub min_reviews: u32,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            processing_interval: Duration::from_secs(120),
            source_timeout: Duration::from_secs(30),
            max_candidate_attempts: 3,
            max_source_failures: 3,
            discovery_backoff_base: Duration::from_secs(60),
            discovery_backoff_max: Duration::from_secs(1800),
            source_chain: DEFAULT_SOURCE_CHAIN.to_vec(),
            required_fields: RequiredFields::default(),
            precedence: PrecedenceTable::default(),
            score_weights: ScoreWeights::default(),
            min_rating: 4.0,
            min_reviews: 10,
        }
    }
}

pub const DEFAULT_SOURCE_CHAIN: [SourceId; 5] = [
    SourceId::Apollo,
    SourceId::Hunter,
    SourceId::Website,
    SourceId::Maps,
    SourceId::Search,
];

const DEFAULT_MESSAGE_TEMPLATE: &str = "Bonjour {contact},\n\nEn découvrant {company}, {specific_point}.\n\n{value_proposition}\n\nSeriez-vous disponible pour un court échange cette semaine ?";

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub providers: ProviderSettings,
    pub targeting: Targeting,
    pub policy: PipelinePolicy,
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_or(name: &str, default: &str) -> String {
    env_opt(name).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match env_opt(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        None => Ok(default),
    }
}

fn env_url(name: &str, default: &str) -> anyhow::Result<String> {
    let url = env_or(name, default);
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url.trim_end_matches('/').to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse a comma-separated source chain (`apollo,hunter,website`).
pub fn parse_source_chain(raw: &str) -> anyhow::Result<Vec<SourceId>> {
    let mut chain = Vec::new();
    for name in split_list(raw) {
        let source: SourceId = name.parse().map_err(|e: String| anyhow::anyhow!(e))?;
        if matches!(
            source,
            SourceId::Discovery | SourceId::Verifier | SourceId::Generator
        ) {
            anyhow::bail!("SOURCE_CHAIN cannot contain '{}'", source);
        }
        if chain.contains(&source) {
            anyhow::bail!("SOURCE_CHAIN lists '{}' twice", source);
        }
        chain.push(source);
    }
    if chain.is_empty() {
        anyhow::bail!("SOURCE_CHAIN cannot be empty");
    }
    Ok(chain)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable required"))
            .and_then(|url| {
                if url.trim().is_empty() {
                    anyhow::bail!("DATABASE_URL cannot be empty");
                }
                if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                    anyhow::bail!("DATABASE_URL must start with postgresql:// or postgres://");
                }
                Ok(url)
            })?;

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let providers = ProviderSettings {
            serper_api_key: env_opt("SERPER_API_KEY")
                .ok_or_else(|| anyhow::anyhow!("SERPER_API_KEY environment variable required"))?,
            serper_base_url: env_url("SERPER_BASE_URL", "https://google.serper.dev")?,
            hunter_api_key: env_opt("HUNTER_API_KEY"),
            hunter_base_url: env_url("HUNTER_BASE_URL", "https://api.hunter.io")?,
            apollo_api_key: env_opt("APOLLO_API_KEY"),
            apollo_base_url: env_url("APOLLO_BASE_URL", "https://api.apollo.io")?,
            google_maps_api_key: env_opt("GOOGLE_MAPS_API_KEY"),
            google_maps_base_url: env_url(
                "GOOGLE_MAPS_BASE_URL",
                "https://maps.googleapis.com/maps/api/place",
            )?,
            openai_api_key: env_opt("OPENAI_API_KEY"),
            openai_base_url: env_url("OPENAI_BASE_URL", "https://api.openai.com")?,
            openai_model: env_or("OPENAI_MODEL", "gpt-4o-mini"),
            zerobounce_api_key: env_opt("ZEROBOUNCE_API_KEY"),
            zerobounce_base_url: env_url("ZEROBOUNCE_BASE_URL", "https://api.zerobounce.net")?,
        };

        let sector = env_or("SECTOR", "restaurants");
        let service_offered = env_or("SERVICE_OFFERED", "création de sites web");
        let targeting = Targeting {
            targets: env_opt("TARGETS")
                .map(|raw| split_list(&raw))
                .unwrap_or_else(|| vec![sector.clone()]),
            sector,
            service_offered: service_offered.clone(),
            city: env_or("CITY", "Genève"),
            country: env_or("COUNTRY", "Suisse"),
            discovery_limit: env_parse("DISCOVERY_LIMIT", 10usize)?,
            message_template: env_or("MESSAGE_TEMPLATE", DEFAULT_MESSAGE_TEMPLATE),
            value_proposition: env_or(
                "VALUE_PROPOSITION",
                &format!("Nous accompagnons les PME locales en {}.", service_offered),
            ),
            excluded_keywords: env_opt("EXCLUDED_KEYWORDS")
                .map(|raw| split_list(&raw.to_lowercase()))
                .unwrap_or_default(),
        };
        if targeting.discovery_limit == 0 {
            anyhow::bail!("DISCOVERY_LIMIT must be at least 1");
        }

        let score_weights = match env_opt("SCORE_WEIGHTS") {
            Some(raw) => ScoreWeights::parse(&raw, ScoreWeights::default())
                .map_err(|e| anyhow::anyhow!("SCORE_WEIGHTS: {}", e))?,
            None => ScoreWeights::for_service(&targeting.service_offered),
        };
        score_weights
            .validate()
            .map_err(|e| anyhow::anyhow!("SCORE_WEIGHTS: {}", e))?;

        let policy = PipelinePolicy {
            processing_interval: Duration::from_secs(env_parse("PROCESSING_INTERVAL_SECS", 120u64)?),
            source_timeout: Duration::from_secs(env_parse("SOURCE_TIMEOUT_SECS", 30u64)?),
            max_candidate_attempts: env_parse("MAX_CANDIDATE_ATTEMPTS", 3u32)?.max(1),
            max_source_failures: env_parse("MAX_SOURCE_FAILURES", 3u32)?.max(1),
            discovery_backoff_base: Duration::from_secs(env_parse("DISCOVERY_BACKOFF_BASE_SECS", 60u64)?),
            discovery_backoff_max: Duration::from_secs(env_parse("DISCOVERY_BACKOFF_MAX_SECS", 1800u64)?),
            source_chain: match env_opt("SOURCE_CHAIN") {
                Some(raw) => parse_source_chain(&raw)?,
                None => DEFAULT_SOURCE_CHAIN.to_vec(),
            },
            required_fields: match env_opt("REQUIRED_FIELDS") {
                Some(raw) => RequiredFields::parse(&raw)
                    .map_err(|e| anyhow::anyhow!("REQUIRED_FIELDS: {}", e))?,
                None => RequiredFields::default(),
            },
            precedence: match env_opt("FIELD_PRECEDENCE") {
                Some(raw) => PrecedenceTable::parse(&raw)
                    .map_err(|e| anyhow::anyhow!("FIELD_PRECEDENCE: {}", e))?,
                None => PrecedenceTable::default(),
            },
            score_weights,
            min_rating: env_parse("MIN_RATING", 4.0f64)?,
            min_reviews: env_parse("MIN_REVIEWS", 10u32)?,
        };
        if policy.source_timeout.is_zero() {
            anyhow::bail!("SOURCE_TIMEOUT_SECS must be greater than 0");
        }

        let config = Self {
            database_url,
            port,
            providers,
            targeting,
            policy,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::info!(
            "Targeting '{}' in {}, {} (service: {})",
            config.targeting.sector,
            config.targeting.city,
            config.targeting.country,
            config.targeting.service_offered
        );
        tracing::debug!(
            "Source chain: {}",
            config
                .policy
                .source_chain
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>()
                .join(" > ")
        );
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}
