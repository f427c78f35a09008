use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::errors::{AppError, ResultExt};
use crate::models::{
    AttemptLedger, AttemptRecord, Field, IdentityKey, Prospect, ProspectFilter, ProspectStatus,
    Provenance, ScoreBand, SourceId, StoreStats, PIPELINE_ATTEMPT_SOURCE,
};
use crate::store::{check_external_transition, ProspectMutation, ProspectStore};

const PROSPECT_COLUMNS: &str = "id, identity_key, company_name, normalized_name, domain, city, country, \
    discovery_source, website, phone, email, email_status, decision_maker_name, decision_maker_title, \
    linkedin_company, linkedin_person, company_size, industry, estimated_revenue, address, rating, \
    review_count, opening_hours, technologies, outreach_message, specific_point, selection_reason, \
    service_proposal, score, status, field_sources, created_at, processed_at";

/// Column values as stored; converted to and from `Prospect`.
#[derive(Debug, sqlx::FromRow)]
struct ProspectRow {
    id: Uuid,
    identity_key: String,
    company_name: String,
    normalized_name: String,
    domain: Option<String>,
    city: String,
    country: String,
    discovery_source: Option<String>,
    website: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    email_status: Option<String>,
    decision_maker_name: Option<String>,
    decision_maker_title: Option<String>,
    linkedin_company: Option<String>,
    linkedin_person: Option<String>,
    company_size: Option<String>,
    industry: Option<String>,
    estimated_revenue: Option<String>,
    address: Option<String>,
    rating: Option<f64>,
    review_count: Option<i32>,
    opening_hours: Option<String>,
    technologies: Vec<String>,
    outreach_message: Option<String>,
    specific_point: Option<String>,
    selection_reason: Option<String>,
    service_proposal: Option<String>,
    score: i32,
    status: String,
    field_sources: Json<BTreeMap<Field, Provenance>>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<ProspectRow> for Prospect {
    type Error = AppError;

    fn try_from(row: ProspectRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<ProspectStatus>()
            .map_err(|e| AppError::InternalError(format!("row {}: {}", row.id, e)))?;
        Ok(Prospect {
            id: row.id,
            identity_key: row.identity_key,
            company_name: row.company_name,
            normalized_name: row.normalized_name,
            domain: row.domain,
            city: row.city,
            country: row.country,
            discovery_source: row.discovery_source,
            website: row.website,
            phone: row.phone,
            email: row.email,
            email_status: row.email_status,
            decision_maker_name: row.decision_maker_name,
            decision_maker_title: row.decision_maker_title,
            linkedin_company: row.linkedin_company,
            linkedin_person: row.linkedin_person,
            company_size: row.company_size,
            industry: row.industry,
            estimated_revenue: row.estimated_revenue,
            address: row.address,
            rating: row.rating,
            review_count: row.review_count.map(|c| c.max(0) as u32),
            opening_hours: row.opening_hours,
            technologies: row.technologies,
            outreach_message: row.outreach_message,
            specific_point: row.specific_point,
            selection_reason: row.selection_reason,
            service_proposal: row.service_proposal,
            score: row.score,
            status,
            field_sources: row.field_sources.0,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

/// Advisory lock key for one identity component.
fn lock_key(identity_part: &str) -> String {
    format!("prospect:{}", identity_part)
}

/// Exclusive upper bound of a score band.
fn band_upper_bound(band: ScoreBand) -> Option<i32> {
    match band {
        ScoreBand::Excellent => None,
        ScoreBand::Good => Some(ScoreBand::Excellent.min_score()),
        ScoreBand::Medium => Some(ScoreBand::Good.min_score()),
        ScoreBand::Low => Some(ScoreBand::Medium.min_score()),
    }
}

/// PostgreSQL implementation of the Prospect Store.
pub struct PgProspectStore {
    pool: PgPool,
}

impl PgProspectStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Serialize writers of one company on its name and domain.
    async fn lock_identity(
        tx: &mut Transaction<'_, Postgres>,
        identity: &IdentityKey,
    ) -> Result<(), AppError> {
        let mut keys = vec![lock_key(&identity.name_key())];
        if let Some(domain) = &identity.domain {
            keys.push(lock_key(&format!("d:{}", domain)));
        }
        for key in keys {
            sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
                .bind(&key)
                .execute(&mut **tx)
                .await
                .context("Failed to take identity lock")?;
        }
        Ok(())
    }

    async fn resolve_for_update(
        tx: &mut Transaction<'_, Postgres>,
        identity: &IdentityKey,
    ) -> Result<Option<Prospect>, AppError> {
        if let Some(domain) = &identity.domain {
            let row: Option<ProspectRow> = sqlx::query_as(&format!(
                "SELECT {} FROM prospects WHERE domain = $1 LIMIT 1 FOR UPDATE",
                PROSPECT_COLUMNS
            ))
            .bind(domain)
            .fetch_optional(&mut **tx)
            .await
            .context("Failed to resolve prospect by domain")?;
            if let Some(row) = row {
                return Prospect::try_from(row).map(Some);
            }
        }

        let row: Option<ProspectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prospects \
             WHERE normalized_name = $1 AND ($2::text IS NULL OR domain IS NULL) \
             ORDER BY created_at, id LIMIT 1 FOR UPDATE",
            PROSPECT_COLUMNS
        ))
        .bind(&identity.normalized_name)
        .bind(identity.domain.as_deref())
        .fetch_optional(&mut **tx)
        .await
        .context("Failed to resolve prospect by name")?;

        row.map(Prospect::try_from).transpose()
    }

    /// Write every column of `prospect`, keyed by `conflict_target`.
    async fn write(
        tx: &mut Transaction<'_, Postgres>,
        prospect: &Prospect,
        conflict_target: &str,
    ) -> Result<Prospect, AppError> {
        let sql = format!(
            r#"
            INSERT INTO prospects ({columns})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16,
                    $17, $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29, $30, $31,
                    $32, $33)
            ON CONFLICT ({conflict}) DO UPDATE
            SET identity_key = EXCLUDED.identity_key,
                company_name = EXCLUDED.company_name,
                normalized_name = EXCLUDED.normalized_name,
                domain = EXCLUDED.domain,
                city = EXCLUDED.city,
                country = EXCLUDED.country,
                discovery_source = COALESCE(prospects.discovery_source, EXCLUDED.discovery_source),
                website = EXCLUDED.website,
                phone = EXCLUDED.phone,
                email = EXCLUDED.email,
                email_status = EXCLUDED.email_status,
                decision_maker_name = EXCLUDED.decision_maker_name,
                decision_maker_title = EXCLUDED.decision_maker_title,
                linkedin_company = EXCLUDED.linkedin_company,
                linkedin_person = EXCLUDED.linkedin_person,
                company_size = EXCLUDED.company_size,
                industry = EXCLUDED.industry,
                estimated_revenue = EXCLUDED.estimated_revenue,
                address = EXCLUDED.address,
                rating = EXCLUDED.rating,
                review_count = EXCLUDED.review_count,
                opening_hours = EXCLUDED.opening_hours,
                technologies = EXCLUDED.technologies,
                outreach_message = EXCLUDED.outreach_message,
                specific_point = EXCLUDED.specific_point,
                selection_reason = EXCLUDED.selection_reason,
                service_proposal = EXCLUDED.service_proposal,
                score = EXCLUDED.score,
                status = EXCLUDED.status,
                field_sources = EXCLUDED.field_sources,
                processed_at = EXCLUDED.processed_at,
                updated_at = now()
            RETURNING {columns}
            "#,
            columns = PROSPECT_COLUMNS,
            conflict = conflict_target,
        );

        let row: ProspectRow = sqlx::query_as(&sql)
            .bind(prospect.id)
            .bind(&prospect.identity_key)
            .bind(&prospect.company_name)
            .bind(&prospect.normalized_name)
            .bind(&prospect.domain)
            .bind(&prospect.city)
            .bind(&prospect.country)
            .bind(&prospect.discovery_source)
            .bind(&prospect.website)
            .bind(&prospect.phone)
            .bind(&prospect.email)
            .bind(&prospect.email_status)
            .bind(&prospect.decision_maker_name)
            .bind(&prospect.decision_maker_title)
            .bind(&prospect.linkedin_company)
            .bind(&prospect.linkedin_person)
            .bind(&prospect.company_size)
            .bind(&prospect.industry)
            .bind(&prospect.estimated_revenue)
            .bind(&prospect.address)
            .bind(prospect.rating)
            .bind(prospect.review_count.map(|c| c.min(i32::MAX as u32) as i32))
            .bind(&prospect.opening_hours)
            .bind(&prospect.technologies)
            .bind(&prospect.outreach_message)
            .bind(&prospect.specific_point)
            .bind(&prospect.selection_reason)
            .bind(&prospect.service_proposal)
            .bind(prospect.score)
            .bind(prospect.status.as_str())
            .bind(Json(prospect.field_sources.clone()))
            .bind(prospect.created_at)
            .bind(prospect.processed_at)
            .fetch_one(&mut **tx)
            .await
            .context("Failed to write prospect")?;

        row.try_into()
    }
}

#[async_trait]
impl ProspectStore for PgProspectStore {
    async fn find_by_identity(&self, identity: &IdentityKey) -> Result<Option<Prospect>, AppError> {
        if let Some(domain) = &identity.domain {
            let row: Option<ProspectRow> = sqlx::query_as(&format!(
                "SELECT {} FROM prospects WHERE domain = $1 LIMIT 1",
                PROSPECT_COLUMNS
            ))
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                return Prospect::try_from(row).map(Some);
            }
        }

        let row: Option<ProspectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prospects \
             WHERE normalized_name = $1 AND ($2::text IS NULL OR domain IS NULL) \
             ORDER BY created_at, id LIMIT 1",
            PROSPECT_COLUMNS
        ))
        .bind(&identity.normalized_name)
        .bind(identity.domain.as_deref())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Prospect::try_from).transpose()
    }

    async fn upsert(
        &self,
        identity: &IdentityKey,
        mutation: ProspectMutation,
    ) -> Result<Prospect, AppError> {
        let mut tx = self.pool.begin().await?;
        Self::lock_identity(&mut tx, identity).await?;

        let existing = Self::resolve_for_update(&mut tx, identity).await?;
        let existing_id = existing.as_ref().map(|p| (p.id, p.created_at));

        // An error here drops the transaction, which rolls it back
        let mut updated = mutation(existing)?;
        let conflict_target = match existing_id {
            Some((id, created_at)) => {
                updated.id = id;
                updated.created_at = created_at;
                "id"
            }
            None => "identity_key",
        };

        let stored = Self::write(&mut tx, &updated, conflict_target).await?;
        tx.commit().await.context("Failed to commit prospect upsert")?;

        tracing::debug!("✓ Prospect {} stored as {}", stored.id, stored.identity_key);
        Ok(stored)
    }

    async fn list(&self, filter: &ProspectFilter) -> Result<Vec<Prospect>, AppError> {
        let rows: Vec<ProspectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prospects \
             WHERE ($1::int IS NULL OR score >= $1) \
               AND ($2::int IS NULL OR score < $2) \
               AND ($3::text IS NULL OR status = $3) \
             ORDER BY score DESC, created_at, id \
             LIMIT $4",
            PROSPECT_COLUMNS
        ))
        .bind(filter.effective_min_score())
        .bind(filter.band.and_then(band_upper_bound))
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.limit.unwrap_or(i64::MAX).max(0))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Prospect::try_from).collect()
    }

    async fn get(&self, id: Uuid) -> Result<Option<Prospect>, AppError> {
        let row: Option<ProspectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prospects WHERE id = $1",
            PROSPECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Prospect::try_from).transpose()
    }

    async fn update_status(&self, id: Uuid, status: ProspectStatus) -> Result<Prospect, AppError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<ProspectRow> = sqlx::query_as(&format!(
            "SELECT {} FROM prospects WHERE id = $1 FOR UPDATE",
            PROSPECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;
        let mut prospect: Prospect = row
            .ok_or_else(|| AppError::NotFound(format!("Prospect {} not found", id)))?
            .try_into()?;

        check_external_transition(&prospect, status)?;

        // Only the status column: core-owned fields stay untouched
        sqlx::query("UPDATE prospects SET status = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&mut *tx)
            .await
            .context("Failed to update prospect status")?;
        tx.commit().await?;

        tracing::info!("Prospect {} moved from {} to {}", id, prospect.status, status);
        prospect.status = status;
        Ok(prospect)
    }

    async fn load_ledger(&self, identity: &IdentityKey) -> Result<AttemptLedger, AppError> {
        let rows = sqlx::query_as::<_, (String, i32, i32, Option<String>, Option<String>)>(
            r#"
            SELECT source, attempts, consecutive_failures, last_error_kind, last_error
            FROM candidate_attempts
            WHERE identity_key = $1
            "#,
        )
        .bind(identity.key())
        .fetch_all(&self.pool)
        .await
        .context("Failed to load attempt ledger")?;

        let mut ledger = AttemptLedger::default();
        for (source, attempts, consecutive_failures, last_error_kind, last_error) in rows {
            let record = AttemptRecord {
                attempts: attempts.max(0) as u32,
                consecutive_failures: consecutive_failures.max(0) as u32,
                last_error_kind,
                last_error,
            };
            if source == PIPELINE_ATTEMPT_SOURCE {
                ledger.pipeline = record;
                continue;
            }
            match source.parse::<SourceId>() {
                Ok(source) => {
                    ledger.sources.insert(source, record);
                }
                Err(e) => tracing::warn!("Ignoring attempt row for {}: {}", identity, e),
            }
        }
        Ok(ledger)
    }

    async fn save_ledger(
        &self,
        identity: &IdentityKey,
        ledger: &AttemptLedger,
    ) -> Result<(), AppError> {
        let key = identity.key();
        let entries = ledger
            .sources
            .iter()
            .map(|(source, record)| (source.as_str(), record))
            .chain(std::iter::once((PIPELINE_ATTEMPT_SOURCE, &ledger.pipeline)));

        let mut tx = self.pool.begin().await?;
        for (source, record) in entries {
            sqlx::query(
                r#"
                INSERT INTO candidate_attempts (
                    identity_key, source, attempts, consecutive_failures, last_error_kind, last_error
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (identity_key, source) DO UPDATE
                SET attempts = EXCLUDED.attempts,
                    consecutive_failures = EXCLUDED.consecutive_failures,
                    last_error_kind = EXCLUDED.last_error_kind,
                    last_error = EXCLUDED.last_error,
                    updated_at = now()
                "#,
            )
            .bind(&key)
            .bind(source)
            .bind(record.attempts.min(i32::MAX as u32) as i32)
            .bind(record.consecutive_failures.min(i32::MAX as u32) as i32)
            .bind(&record.last_error_kind)
            .bind(&record.last_error)
            .execute(&mut *tx)
            .await
            .context("Failed to save attempt ledger")?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        let (total, with_email, scored, insufficient_data) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(email),
                    COUNT(*) FILTER (WHERE status IN (
                        'scored', 'contacted', 'responded', 'interested', 'not-interested', 'qualified'
                    )),
                    COUNT(*) FILTER (WHERE status = 'insufficient-data')
                FROM prospects
                "#,
            )
            .fetch_one(&self.pool)
            .await
            .context("Failed to compute store statistics")?;

        Ok(StoreStats {
            total,
            with_email,
            scored,
            insufficient_data,
        })
    }
}
