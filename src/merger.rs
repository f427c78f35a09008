//! Field Merger: folds PartialRecords into one Prospect, field by field.
//!
//! Every field is ranked independently by `(quality class, source priority)`.
//! Within one pass the first record wins ties; against the stored row a value
//! replaces the stored one when its rank is equal or higher. Empty values never
//! reach the row.
use std::collections::BTreeMap;

use crate::models::{
    Candidate, Field, FieldData, FieldValue, PartialRecord, Prospect, Provenance, Quality, SourceId,
};
use crate::normalize::{is_generic_email, is_valid_email, normalize_phone};

/// Ranked source list per field. Earlier sources win.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecedenceTable {
    order: BTreeMap<Field, Vec<SourceId>>,
}

impl Default for PrecedenceTable {
    fn default() -> Self {
        use SourceId::*;

        let mut order = BTreeMap::new();
        order.insert(Field::Website, vec![Discovery, Maps, Apollo, Website]);
        order.insert(Field::Phone, vec![Maps, Apollo, Hunter, Website, Discovery]);
        order.insert(Field::Email, vec![Apollo, Hunter, Website, Discovery]);
        order.insert(Field::EmailStatus, vec![Verifier]);
        order.insert(Field::PersonName, vec![Apollo, Hunter, Website]);
        order.insert(Field::PersonTitle, vec![Apollo, Hunter, Website]);
        order.insert(Field::LinkedinCompany, vec![Apollo, Hunter, Website, Search]);
        order.insert(Field::LinkedinPerson, vec![Apollo, Hunter, Search]);
        order.insert(Field::CompanySize, vec![Apollo]);
        order.insert(Field::Industry, vec![Apollo, Maps]);
        order.insert(Field::Revenue, vec![Apollo]);
        order.insert(Field::Address, vec![Maps, Apollo, Discovery]);
        order.insert(Field::Rating, vec![Maps, Discovery]);
        order.insert(Field::ReviewCount, vec![Maps, Discovery]);
        order.insert(Field::OpeningHours, vec![Maps]);
        order.insert(Field::Technologies, vec![Website]);
        order.insert(Field::Message, vec![Generator]);
        order.insert(Field::SpecificPoint, vec![Generator]);
        order.insert(Field::SelectionReason, vec![Generator]);
        order.insert(Field::ServiceProposal, vec![Generator]);
        Self { order }
    }
}

impl PrecedenceTable {
    /// Parse overrides on top of the defaults.
    ///
    /// Format: `email=apollo>hunter>website;phone=maps>apollo`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut table = Self::default();
        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (field, sources) = entry
                .split_once('=')
                .ok_or_else(|| format!("expected field=source>source, got '{}'", entry))?;
            let field: Field = field.parse()?;
            let mut ranked = Vec::new();
            for name in sources.split('>').map(str::trim).filter(|s| !s.is_empty()) {
                let source: SourceId = name.parse()?;
                if !source_may_write(source, field) {
                    return Err(format!("source '{}' cannot supply '{}'", source, field));
                }
                if ranked.contains(&source) {
                    return Err(format!("source '{}' listed twice for '{}'", source, field));
                }
                ranked.push(source);
            }
            if ranked.is_empty() {
                return Err(format!("no sources listed for '{}'", field));
            }
            table.order.insert(field, ranked);
        }
        Ok(table)
    }

    pub fn with_order(mut self, field: Field, sources: Vec<SourceId>) -> Self {
        self.order.insert(field, sources);
        self
    }

    /// Higher is better. Sources not listed for the field rank 0.
    pub fn priority(&self, field: Field, source: SourceId) -> u8 {
        self.order
            .get(&field)
            .and_then(|ranked| {
                ranked
                    .iter()
                    .position(|s| *s == source)
                    .map(|idx| (ranked.len() - idx) as u8)
            })
            .unwrap_or(0)
    }

    pub fn order(&self, field: Field) -> &[SourceId] {
        self.order.get(&field).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Which fields a source is allowed to write at all.
///
/// The generator only ever writes the message and the relevance analysis, the
/// verifier only the email status; no other source may touch those fields.
pub fn source_may_write(source: SourceId, field: Field) -> bool {
    match field {
        Field::Message | Field::SpecificPoint | Field::SelectionReason | Field::ServiceProposal => {
            source == SourceId::Generator
        }
        Field::EmailStatus => source == SourceId::Verifier,
        _ => !matches!(source, SourceId::Generator | SourceId::Verifier),
    }
}

/// Ordering key of a field value. Quality class dominates source priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rank {
    pub class: u8,
    pub priority: u8,
}

/// Quality class of a value: named emails beat role mailboxes, verified beats unverified.
pub fn quality_class(field: Field, value: &FieldValue) -> u8 {
    match (field, &value.data) {
        (Field::Email, FieldData::Text(email)) => {
            if is_generic_email(email) {
                0
            } else {
                1
            }
        }
        _ => match value.quality {
            Quality::Verified => 1,
            Quality::Unverified => 0,
        },
    }
}

#[derive(Debug, Clone)]
pub struct FieldMerger {
    table: PrecedenceTable,
}

impl FieldMerger {
    pub fn new(table: PrecedenceTable) -> Self {
        Self { table }
    }

    pub fn table(&self) -> &PrecedenceTable {
        &self.table
    }

    /// Merge `records` (in chain order) into `existing`, or into a fresh row.
    ///
    /// The candidate's own seed (website, discovery data) is folded in first
    /// at discovery priority.
    ///
    /// # Arguments
    ///
    /// * `existing` - The stored Prospect for this identity, if any.
    /// * `candidate` - The candidate being processed.
    /// * `records` - PartialRecords in the order their sources were consulted.
    ///
    /// # Returns
    ///
    /// * `Prospect` - The merged record. Status and score are left untouched.
    pub fn merge(
        &self,
        existing: Option<Prospect>,
        candidate: &Candidate,
        records: &[PartialRecord],
    ) -> Prospect {
        let mut prospect = existing.unwrap_or_else(|| Prospect::from_candidate(candidate));
        adopt_identity(&mut prospect, candidate);

        let seed = seed_record(candidate);
        let all: Vec<&PartialRecord> = std::iter::once(&seed).chain(records.iter()).collect();

        for field in Field::ALL {
            let Some((rank, source, data)) = self.best_in_pass(field, &candidate.locale.country, &all)
            else {
                continue;
            };

            let replace = match self.stored_rank(&prospect, field) {
                None => true,
                Some(stored) => rank >= stored,
            };
            if !replace {
                continue;
            }

            if field == Field::Email {
                reset_stale_email_status(&mut prospect, &data);
            }
            prospect.set_field(field, data);
            prospect.field_sources.insert(
                field,
                Provenance {
                    source,
                    class: rank.class,
                },
            );
        }

        prospect
    }

    /// Highest-ranked value for `field` among this pass's records; first wins ties.
    fn best_in_pass(
        &self,
        field: Field,
        country: &str,
        records: &[&PartialRecord],
    ) -> Option<(Rank, SourceId, FieldData)> {
        let mut best: Option<(Rank, SourceId, FieldData)> = None;
        for record in records {
            if !source_may_write(record.source, field) {
                continue;
            }
            let Some(value) = record.get(field) else {
                continue;
            };
            let Some(data) = normalize_value(field, &value.data, country) else {
                continue;
            };
            let normalized = FieldValue {
                data,
                quality: value.quality,
            };
            let rank = Rank {
                class: quality_class(field, &normalized),
                priority: self.table.priority(field, record.source),
            };
            let better = match &best {
                None => true,
                Some((current, _, _)) => rank > *current,
            };
            if better {
                best = Some((rank, record.source, normalized.data));
            }
        }
        best
    }

    /// Rank of the stored value, `None` when the field is empty.
    fn stored_rank(&self, prospect: &Prospect, field: Field) -> Option<Rank> {
        if !prospect.has(field) {
            return None;
        }
        Some(match prospect.field_sources.get(&field) {
            Some(provenance) => Rank {
                class: provenance.class,
                priority: self.table.priority(field, provenance.source),
            },
            None => Rank {
                class: 0,
                priority: 0,
            },
        })
    }
}

impl Default for FieldMerger {
    fn default() -> Self {
        Self::new(PrecedenceTable::default())
    }
}

/// A row first keyed by name takes the domain of a later candidate.
fn adopt_identity(prospect: &mut Prospect, candidate: &Candidate) {
    if prospect.domain.is_none() {
        if let Some(domain) = candidate.domain() {
            prospect.domain = Some(domain);
            prospect.identity_key = prospect.identity().key();
        }
    }
    if prospect.city.is_empty() {
        prospect.city = candidate.locale.city.clone();
    }
    if prospect.country.is_empty() {
        prospect.country = candidate.locale.country.clone();
    }
    if prospect.discovery_source.is_none() {
        prospect.discovery_source = Some(candidate.discovery_source.clone());
    }
}

fn seed_record(candidate: &Candidate) -> PartialRecord {
    let mut seed = candidate.seed.clone();
    seed.source = SourceId::Discovery;
    if let Some(website) = &candidate.website {
        if seed.get(Field::Website).is_none() {
            seed.set(Field::Website, FieldData::Text(website.clone()), Quality::Unverified);
        }
    }
    seed
}

/// The status described a different mailbox; mark it unknown until re-verified.
fn reset_stale_email_status(prospect: &mut Prospect, new_email: &FieldData) {
    let changed = match (prospect.email.as_deref(), new_email.as_text()) {
        (Some(old), Some(new)) => !old.eq_ignore_ascii_case(new),
        _ => false,
    };
    if changed && prospect.email_status.is_some() {
        prospect.set_field(Field::EmailStatus, FieldData::Text("unknown".to_string()));
        prospect.field_sources.insert(
            Field::EmailStatus,
            Provenance {
                source: SourceId::Verifier,
                class: 0,
            },
        );
    }
}

/// Canonical form of a value, `None` if it is unusable.
fn normalize_value(field: Field, data: &FieldData, country: &str) -> Option<FieldData> {
    if data.is_empty() {
        return None;
    }
    match (field, data) {
        (Field::Email, FieldData::Text(email)) => {
            let email = email.trim().to_lowercase();
            is_valid_email(&email).then_some(FieldData::Text(email))
        }
        (Field::Phone, FieldData::Text(raw)) => Some(FieldData::Text(
            normalize_phone(raw, country).unwrap_or_else(|| raw.trim().to_string()),
        )),
        (Field::LinkedinCompany | Field::LinkedinPerson, FieldData::Text(url)) => {
            Some(FieldData::Text(url.trim().trim_end_matches('/').to_string()))
        }
        (Field::Rating, FieldData::Number(n)) => (*n >= 0.0).then_some(FieldData::Number(*n)),
        (_, data) => Some(data.clone()),
    }
}
