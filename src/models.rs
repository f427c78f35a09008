use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::normalize::{extract_domain, normalize_company_name};

// ============ Sources & Fields ============

/// Provider that contributed a `PartialRecord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Seed data reported by the discovery source.
    Discovery,
    /// Contact-enrichment A: organization and decision-maker search.
    Apollo,
    /// Contact-enrichment B: domain email search.
    Hunter,
    /// Direct scrape of the company website.
    Website,
    /// Places lookup (verified phone, address, reviews).
    Maps,
    /// Search-engine derived LinkedIn guess.
    Search,
    /// Mailbox verification.
    Verifier,
    /// AI outreach message generation.
    Generator,
}

impl SourceId {
    pub const ALL: [SourceId; 8] = [
        SourceId::Discovery,
        SourceId::Apollo,
        SourceId::Hunter,
        SourceId::Website,
        SourceId::Maps,
        SourceId::Search,
        SourceId::Verifier,
        SourceId::Generator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::Discovery => "discovery",
            SourceId::Apollo => "apollo",
            SourceId::Hunter => "hunter",
            SourceId::Website => "website",
            SourceId::Maps => "maps",
            SourceId::Search => "search",
            SourceId::Verifier => "verifier",
            SourceId::Generator => "generator",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SourceId::ALL
            .into_iter()
            .find(|source| source.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown source '{}'", s))
    }
}

/// Kind of value a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Number,
    Count,
    List,
}

/// Every mergeable Prospect attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Website,
    Phone,
    Email,
    EmailStatus,
    PersonName,
    PersonTitle,
    LinkedinCompany,
    LinkedinPerson,
    CompanySize,
    Industry,
    Revenue,
    Address,
    Rating,
    ReviewCount,
    OpeningHours,
    Technologies,
    Message,
    SpecificPoint,
    /// Why this company is worth contacting.
    SelectionReason,
    /// Service to pitch to it.
    ServiceProposal,
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::Website,
        Field::Phone,
        Field::Email,
        Field::EmailStatus,
        Field::PersonName,
        Field::PersonTitle,
        Field::LinkedinCompany,
        Field::LinkedinPerson,
        Field::CompanySize,
        Field::Industry,
        Field::Revenue,
        Field::Address,
        Field::Rating,
        Field::ReviewCount,
        Field::OpeningHours,
        Field::Technologies,
        Field::Message,
        Field::SpecificPoint,
        Field::SelectionReason,
        Field::ServiceProposal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Field::Website => "website",
            Field::Phone => "phone",
            Field::Email => "email",
            Field::EmailStatus => "email_status",
            Field::PersonName => "person_name",
            Field::PersonTitle => "person_title",
            Field::LinkedinCompany => "linkedin_company",
            Field::LinkedinPerson => "linkedin_person",
            Field::CompanySize => "company_size",
            Field::Industry => "industry",
            Field::Revenue => "revenue",
            Field::Address => "address",
            Field::Rating => "rating",
            Field::ReviewCount => "review_count",
            Field::OpeningHours => "opening_hours",
            Field::Technologies => "technologies",
            Field::Message => "message",
            Field::SpecificPoint => "specific_point",
            Field::SelectionReason => "selection_reason",
            Field::ServiceProposal => "service_proposal",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Field::Rating => FieldKind::Number,
            Field::ReviewCount => FieldKind::Count,
            Field::Technologies => FieldKind::List,
            _ => FieldKind::Text,
        }
    }

    /// Fields that count as a contact channel.
    pub fn is_contact_channel(&self) -> bool {
        matches!(self, Field::Email | Field::Phone)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Field {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('-', "_");
        Field::ALL
            .into_iter()
            .find(|field| field.as_str() == wanted)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// A single field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldData {
    Text(String),
    Number(f64),
    Count(u32),
    List(Vec<String>),
}

impl FieldData {
    pub fn is_empty(&self) -> bool {
        match self {
            FieldData::Text(s) => s.trim().is_empty(),
            FieldData::Number(n) => !n.is_finite(),
            FieldData::Count(_) => false,
            FieldData::List(items) => items.iter().all(|i| i.trim().is_empty()),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            FieldData::Text(_) => FieldKind::Text,
            FieldData::Number(_) => FieldKind::Number,
            FieldData::Count(_) => FieldKind::Count,
            FieldData::List(_) => FieldKind::List,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldData::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }
}

/// Confidence attached to a value by the source that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    #[default]
    Unverified,
    Verified,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldValue {
    pub data: FieldData,
    pub quality: Quality,
}

// ============ Pipeline records ============

/// City/country pair a candidate was discovered in.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Locale {
    pub city: String,
    pub country: String,
}

impl Locale {
    pub fn new(city: impl Into<String>, country: impl Into<String>) -> Self {
        Self {
            city: city.into(),
            country: country.into(),
        }
    }
}

impl fmt::Display for Locale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.city, self.country)
    }
}

/// One source's sparse contribution for one candidate.
///
/// Only ever lives for the duration of an orchestration pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialRecord {
    pub source: SourceId,
    pub fields: BTreeMap<Field, FieldValue>,
}

impl PartialRecord {
    pub fn new(source: SourceId) -> Self {
        Self {
            source,
            fields: BTreeMap::new(),
        }
    }

    /// Set a field, ignoring empty values and values of the wrong kind.
    pub fn set(&mut self, field: Field, data: FieldData, quality: Quality) {
        if data.is_empty() || data.kind() != field.kind() {
            return;
        }
        self.fields.insert(field, FieldValue { data, quality });
    }

    pub fn with(mut self, field: Field, data: FieldData, quality: Quality) -> Self {
        self.set(field, data, quality);
        self
    }

    pub fn with_text(self, field: Field, value: impl Into<String>) -> Self {
        let value = value.into().trim().to_string();
        self.with(field, FieldData::Text(value), Quality::Unverified)
    }

    pub fn with_verified_text(self, field: Field, value: impl Into<String>) -> Self {
        let value = value.into().trim().to_string();
        self.with(field, FieldData::Text(value), Quality::Verified)
    }

    pub fn with_opt_text(self, field: Field, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.with_text(field, v),
            None => self,
        }
    }

    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.fields.get(&field)
    }

    pub fn text(&self, field: Field) -> Option<&str> {
        self.get(field).and_then(|v| v.data.as_text())
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// A discovered company reference awaiting processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub company_name: String,
    pub website: Option<String>,
    pub locale: Locale,
    /// Discovery provider that surfaced this company (`maps`, `search`).
    pub discovery_source: String,
    pub discovered_at: DateTime<Utc>,
    /// Data the discovery provider already reported (phone, rating...).
    pub seed: PartialRecord,
}

impl Candidate {
    pub fn new(
        company_name: impl Into<String>,
        website: Option<String>,
        locale: Locale,
        discovery_source: impl Into<String>,
    ) -> Self {
        Self {
            company_name: company_name.into().trim().to_string(),
            website: website.filter(|w| !w.trim().is_empty()),
            locale,
            discovery_source: discovery_source.into(),
            discovered_at: Utc::now(),
            seed: PartialRecord::new(SourceId::Discovery),
        }
    }

    pub fn with_seed(mut self, seed: PartialRecord) -> Self {
        self.seed = PartialRecord {
            source: SourceId::Discovery,
            fields: seed.fields,
        };
        self
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(&self.company_name, self.website.as_deref())
    }

    pub fn domain(&self) -> Option<String> {
        self.website.as_deref().and_then(extract_domain)
    }
}

/// Company identity used for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdentityKey {
    pub normalized_name: String,
    pub domain: Option<String>,
}

impl IdentityKey {
    pub fn new(company_name: &str, website: Option<&str>) -> Self {
        Self {
            normalized_name: normalize_company_name(company_name),
            domain: website.and_then(extract_domain),
        }
    }

    /// Primary store key: domain when known, else normalized name.
    pub fn key(&self) -> String {
        match &self.domain {
            Some(domain) => format!("d:{}", domain),
            None => self.name_key(),
        }
    }

    pub fn name_key(&self) -> String {
        format!("n:{}", self.normalized_name)
    }

    /// Whether `other` designates the same real company.
    ///
    /// Equal domains always match. Equal names match unless both sides carry
    /// different domains (two shops called "Dupont" in different cities).
    pub fn matches(&self, other: &IdentityKey) -> bool {
        match (&self.domain, &other.domain) {
            (Some(a), Some(b)) => a == b,
            _ => self.normalized_name == other.normalized_name,
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

// ============ Prospect ============

/// Processing status of a Prospect.
///
/// Core states (`new` .. `scored`) are driven by the pipeline; tail states
/// (`contacted` onwards) only by external collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProspectStatus {
    New,
    Processing,
    Enriched,
    InsufficientData,
    Scored,
    Contacted,
    Responded,
    Interested,
    NotInterested,
    Qualified,
}

impl ProspectStatus {
    pub const ALL: [ProspectStatus; 10] = [
        ProspectStatus::New,
        ProspectStatus::Processing,
        ProspectStatus::Enriched,
        ProspectStatus::InsufficientData,
        ProspectStatus::Scored,
        ProspectStatus::Contacted,
        ProspectStatus::Responded,
        ProspectStatus::Interested,
        ProspectStatus::NotInterested,
        ProspectStatus::Qualified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProspectStatus::New => "new",
            ProspectStatus::Processing => "processing",
            ProspectStatus::Enriched => "enriched",
            ProspectStatus::InsufficientData => "insufficient-data",
            ProspectStatus::Scored => "scored",
            ProspectStatus::Contacted => "contacted",
            ProspectStatus::Responded => "responded",
            ProspectStatus::Interested => "interested",
            ProspectStatus::NotInterested => "not-interested",
            ProspectStatus::Qualified => "qualified",
        }
    }

    /// Position in the state machine; transitions never lower it.
    pub fn rank(&self) -> u8 {
        match self {
            ProspectStatus::New => 0,
            ProspectStatus::Processing => 1,
            ProspectStatus::Enriched => 2,
            ProspectStatus::InsufficientData => 3,
            ProspectStatus::Scored => 4,
            ProspectStatus::Contacted => 5,
            ProspectStatus::Responded => 6,
            ProspectStatus::Interested
            | ProspectStatus::NotInterested
            | ProspectStatus::Qualified => 7,
        }
    }

    pub fn is_tail(&self) -> bool {
        self.rank() >= ProspectStatus::Contacted.rank()
    }

    /// Status after the pipeline asks for `target`.
    ///
    /// Core transitions only move forward; once a row reached a tail state the
    /// pipeline leaves its status alone.
    pub fn advance_to(self, target: ProspectStatus) -> ProspectStatus {
        if self.is_tail() || target.is_tail() {
            return self;
        }
        if target.rank() > self.rank() {
            target
        } else {
            self
        }
    }

    /// Whether an external collaborator may move a row from `self` to `target`.
    pub fn can_transition_externally(&self, target: ProspectStatus) -> bool {
        if !target.is_tail() {
            return false;
        }
        let from_ok = *self == ProspectStatus::Scored || self.is_tail();
        from_ok && target.rank() >= self.rank()
    }
}

impl fmt::Display for ProspectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProspectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase().replace('_', "-");
        ProspectStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// Which source last wrote a field, and with what quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub source: SourceId,
    pub class: u8,
}

/// The durable, merged record of one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prospect {
    pub id: Uuid,
    pub identity_key: String,
    pub company_name: String,
    pub normalized_name: String,
    pub domain: Option<String>,
    pub city: String,
    pub country: String,
    pub discovery_source: Option<String>,
    pub website: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub email_status: Option<String>,
    pub decision_maker_name: Option<String>,
    pub decision_maker_title: Option<String>,
    pub linkedin_company: Option<String>,
    pub linkedin_person: Option<String>,
    pub company_size: Option<String>,
    pub industry: Option<String>,
    pub estimated_revenue: Option<String>,
    pub address: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub opening_hours: Option<String>,
    pub technologies: Vec<String>,
    pub outreach_message: Option<String>,
    pub specific_point: Option<String>,
    pub selection_reason: Option<String>,
    pub service_proposal: Option<String>,
    pub score: i32,
    pub status: ProspectStatus,
    pub field_sources: BTreeMap<Field, Provenance>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl Prospect {
    /// Fresh `new` row for a candidate that has never been merged.
    pub fn from_candidate(candidate: &Candidate) -> Self {
        let identity = candidate.identity();
        Self {
            id: Uuid::new_v4(),
            identity_key: identity.key(),
            company_name: candidate.company_name.clone(),
            normalized_name: identity.normalized_name,
            domain: identity.domain,
            city: candidate.locale.city.clone(),
            country: candidate.locale.country.clone(),
            discovery_source: Some(candidate.discovery_source.clone()),
            website: None,
            phone: None,
            email: None,
            email_status: None,
            decision_maker_name: None,
            decision_maker_title: None,
            linkedin_company: None,
            linkedin_person: None,
            company_size: None,
            industry: None,
            estimated_revenue: None,
            address: None,
            rating: None,
            review_count: None,
            opening_hours: None,
            technologies: Vec::new(),
            outreach_message: None,
            specific_point: None,
            selection_reason: None,
            service_proposal: None,
            score: 0,
            status: ProspectStatus::New,
            field_sources: BTreeMap::new(),
            created_at: Utc::now(),
            processed_at: None,
        }
    }

    pub fn identity(&self) -> IdentityKey {
        IdentityKey {
            normalized_name: self.normalized_name.clone(),
            domain: self.domain.clone(),
        }
    }

    pub fn field(&self, field: Field) -> Option<FieldData> {
        let text = |v: &Option<String>| v.clone().map(FieldData::Text);
        match field {
            Field::Website => text(&self.website),
            Field::Phone => text(&self.phone),
            Field::Email => text(&self.email),
            Field::EmailStatus => text(&self.email_status),
            Field::PersonName => text(&self.decision_maker_name),
            Field::PersonTitle => text(&self.decision_maker_title),
            Field::LinkedinCompany => text(&self.linkedin_company),
            Field::LinkedinPerson => text(&self.linkedin_person),
            Field::CompanySize => text(&self.company_size),
            Field::Industry => text(&self.industry),
            Field::Revenue => text(&self.estimated_revenue),
            Field::Address => text(&self.address),
            Field::Rating => self.rating.map(FieldData::Number),
            Field::ReviewCount => self.review_count.map(FieldData::Count),
            Field::OpeningHours => text(&self.opening_hours),
            Field::Technologies => {
                if self.technologies.is_empty() {
                    None
                } else {
                    Some(FieldData::List(self.technologies.clone()))
                }
            }
            Field::Message => text(&self.outreach_message),
            Field::SpecificPoint => text(&self.specific_point),
            Field::SelectionReason => text(&self.selection_reason),
            Field::ServiceProposal => text(&self.service_proposal),
        }
        .filter(|data| !data.is_empty())
    }

    pub fn has(&self, field: Field) -> bool {
        self.field(field).is_some()
    }

    /// Write a field value. Empty values and kind mismatches are ignored.
    pub fn set_field(&mut self, field: Field, data: FieldData) {
        if data.is_empty() || data.kind() != field.kind() {
            return;
        }
        match (field, data) {
            (Field::Rating, FieldData::Number(n)) => self.rating = Some(n),
            (Field::ReviewCount, FieldData::Count(c)) => self.review_count = Some(c),
            (Field::Technologies, FieldData::List(items)) => {
                self.technologies = items
                    .into_iter()
                    .map(|i| i.trim().to_lowercase())
                    .filter(|i| !i.is_empty())
                    .collect();
                self.technologies.sort();
                self.technologies.dedup();
            }
            (field, FieldData::Text(value)) => {
                let slot = match field {
                    Field::Website => &mut self.website,
                    Field::Phone => &mut self.phone,
                    Field::Email => &mut self.email,
                    Field::EmailStatus => &mut self.email_status,
                    Field::PersonName => &mut self.decision_maker_name,
                    Field::PersonTitle => &mut self.decision_maker_title,
                    Field::LinkedinCompany => &mut self.linkedin_company,
                    Field::LinkedinPerson => &mut self.linkedin_person,
                    Field::CompanySize => &mut self.company_size,
                    Field::Industry => &mut self.industry,
                    Field::Revenue => &mut self.estimated_revenue,
                    Field::Address => &mut self.address,
                    Field::OpeningHours => &mut self.opening_hours,
                    Field::Message => &mut self.outreach_message,
                    Field::SpecificPoint => &mut self.specific_point,
                    Field::SelectionReason => &mut self.selection_reason,
                    Field::ServiceProposal => &mut self.service_proposal,
                    Field::Rating | Field::ReviewCount | Field::Technologies => return,
                };
                *slot = Some(value.trim().to_string());
            }
            _ => {}
        }
    }

    pub fn band(&self) -> ScoreBand {
        ScoreBand::from_score(self.score)
    }
}

// ============ Scoring ============

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreBand {
    Excellent,
    Good,
    Medium,
    Low,
}

impl ScoreBand {
    pub fn from_score(score: i32) -> Self {
        match score {
            s if s >= 80 => ScoreBand::Excellent,
            s if s >= 60 => ScoreBand::Good,
            s if s >= 40 => ScoreBand::Medium,
            _ => ScoreBand::Low,
        }
    }

    /// Inclusive lower bound of the band.
    pub fn min_score(&self) -> i32 {
        match self {
            ScoreBand::Excellent => 80,
            ScoreBand::Good => 60,
            ScoreBand::Medium => 40,
            ScoreBand::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreBand::Excellent => "excellent",
            ScoreBand::Good => "good",
            ScoreBand::Medium => "medium",
            ScoreBand::Low => "low",
        }
    }
}

impl FromStr for ScoreBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "excellent" => Ok(ScoreBand::Excellent),
            "good" => Ok(ScoreBand::Good),
            "medium" => Ok(ScoreBand::Medium),
            "low" => Ok(ScoreBand::Low),
            other => Err(format!("unknown score band '{}'", other)),
        }
    }
}

// ============ Attempt bookkeeping ============

/// Attempt counters for one source (or the whole pipeline) for one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempts: u32,
    pub consecutive_failures: u32,
    pub last_error_kind: Option<String>,
    pub last_error: Option<String>,
}

impl AttemptRecord {
    pub fn record_success(&mut self) {
        self.attempts += 1;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self, kind: &str, message: &str) {
        self.attempts += 1;
        self.consecutive_failures += 1;
        self.last_error_kind = Some(kind.to_string());
        self.last_error = Some(message.to_string());
    }
}

/// Per-candidate retry bookkeeping, persisted in the attempt side table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptLedger {
    pub sources: BTreeMap<SourceId, AttemptRecord>,
    /// Candidate-level ProcessingAttempt (whole pipeline failures).
    pub pipeline: AttemptRecord,
}

impl AttemptLedger {
    pub fn source(&self, source: SourceId) -> Option<&AttemptRecord> {
        self.sources.get(&source)
    }

    pub fn source_mut(&mut self, source: SourceId) -> &mut AttemptRecord {
        self.sources.entry(source).or_default()
    }
}

/// Pseudo-source name used for candidate-level rows in the attempt table.
pub const PIPELINE_ATTEMPT_SOURCE: &str = "pipeline";

// ============ Read API ============

/// Filtering for read access by external collaborators.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProspectFilter {
    pub min_score: Option<i32>,
    pub status: Option<ProspectStatus>,
    pub band: Option<ScoreBand>,
    pub limit: Option<i64>,
}

impl ProspectFilter {
    pub fn effective_min_score(&self) -> Option<i32> {
        match (self.min_score, self.band.map(|b| b.min_score())) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn accepts(&self, prospect: &Prospect) -> bool {
        if let Some(min) = self.effective_min_score() {
            if prospect.score < min {
                return false;
            }
        }
        if let Some(band) = self.band {
            if prospect.band() != band {
                return false;
            }
        }
        if let Some(status) = self.status {
            if prospect.status != status {
                return false;
            }
        }
        true
    }
}

/// Aggregate counters over the prospect table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total: i64,
    pub with_email: i64,
    pub scored: i64,
    pub insufficient_data: i64,
}
