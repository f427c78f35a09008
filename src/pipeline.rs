//! One candidate end to end: orchestrate, merge, score, write the message and
//! commit everything in a single atomic upsert.
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::errors::{AppError, SourceError};
use crate::merger::FieldMerger;
use crate::models::{
    AttemptLedger, Candidate, Field, FieldData, IdentityKey, PartialRecord, Prospect,
    ProspectStatus, Quality, ScoreBand, SourceId,
};
use crate::openai_client::MessageTemplate;
use crate::orchestrator::{Orchestration, SourceOrchestrator};
use crate::scoring::RelevanceScorer;
use crate::sources::{
    EmailStatus, EmailVerifier, GeneratedMessage, MessageGenerator, RelevanceAnalysis,
};
use crate::store::{ProspectMutation, ProspectStore};

/// Outcome summary of one processed candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub identity: String,
    pub company_name: String,
    pub prospect_id: Uuid,
    /// `(source, outcome label)` in chain order.
    pub outcomes: Vec<(SourceId, String)>,
    pub successes: usize,
    pub status: ProspectStatus,
    pub score: i32,
    pub band: ScoreBand,
}

impl CandidateReport {
    pub fn summary(&self) -> String {
        self.outcomes
            .iter()
            .map(|(source, label)| format!("{}={}", source, label))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

pub struct Pipeline {
    store: Arc<dyn ProspectStore>,
    orchestrator: SourceOrchestrator,
    merger: Arc<FieldMerger>,
    scorer: Arc<RelevanceScorer>,
    verifier: Option<Arc<dyn EmailVerifier>>,
    generator: Option<Arc<dyn MessageGenerator>>,
    template: MessageTemplate,
    service_offered: String,
    sector: String,
    call_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ProspectStore>,
        orchestrator: SourceOrchestrator,
        merger: FieldMerger,
        scorer: RelevanceScorer,
        template: MessageTemplate,
    ) -> Self {
        Self {
            store,
            orchestrator,
            merger: Arc::new(merger),
            scorer: Arc::new(scorer),
            verifier: None,
            generator: None,
            template,
            service_offered: "nos services".to_string(),
            sector: String::new(),
            call_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn EmailVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn MessageGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    /// Service and sector the relevance analysis argues for.
    pub fn with_targeting(mut self, service_offered: impl Into<String>, sector: impl Into<String>) -> Self {
        self.service_offered = service_offered.into();
        self.sector = sector.into();
        self
    }

    /// Timeout applied to the verifier and generator calls.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ProspectStore> {
        &self.store
    }

    /// Process one candidate and commit its merged row.
    ///
    /// Source failures are contained: a candidate without any successful
    /// source is still stored, as `insufficient-data`. Only store failures
    /// surface as `Err`, in which case nothing of this pass is committed.
    pub async fn process(&self, candidate: &Candidate) -> Result<CandidateReport, AppError> {
        let identity = candidate.identity();
        tracing::info!("🔄 Processing {} ({})", candidate.company_name, identity);

        let ledger = self.store.load_ledger(&identity).await?;
        let (orchestration, mut ledger) = self.orchestrator.enrich(candidate, ledger).await;
        let successes = orchestration.successes();
        let mut records = orchestration.records();

        if successes > 0 {
            let existing = self.store.find_by_identity(&identity).await?;
            let preview = self.merger.merge(existing.clone(), candidate, &records);

            if let Some(record) = self.verify_email(existing.as_ref(), &preview, &mut ledger).await {
                records.push(record);
            }
            let preview = self.merger.merge(existing, candidate, &records);
            if let Some(record) = self.analyse_relevance(&preview, &mut ledger).await {
                records.push(record);
            }
            if let Some(record) = self.write_message(&preview, &mut ledger).await {
                records.push(record);
            }
        } else {
            tracing::warn!(
                "No source returned data for {}: {}",
                candidate.company_name,
                orchestration.summary()
            );
        }

        let merger = Arc::clone(&self.merger);
        let scorer = Arc::clone(&self.scorer);
        let owned_candidate = candidate.clone();
        let mutation: ProspectMutation = Box::new(move |existing: Option<Prospect>| -> Result<Prospect, AppError> {
            let mut prospect = merger.merge(existing, &owned_candidate, &records);
            prospect.status = prospect.status.advance_to(ProspectStatus::Processing);
            if successes > 0 {
                prospect.status = prospect.status.advance_to(ProspectStatus::Enriched);
            }
            prospect.score = scorer.score(&prospect);
            prospect.status = prospect.status.advance_to(if successes > 0 {
                ProspectStatus::Scored
            } else {
                ProspectStatus::InsufficientData
            });
            prospect.processed_at = Some(Utc::now());
            Ok(prospect)
        });

        let stored = match self.store.upsert(&identity, mutation).await {
            Ok(stored) => stored,
            Err(e) => {
                // Attempt counters still reflect the calls that went out
                self.save_ledger(&identity, &ledger).await;
                return Err(e);
            }
        };

        ledger.pipeline.record_success();
        self.save_ledger(&identity, &ledger).await;

        let report = report(&identity, &stored, &orchestration);
        tracing::info!(
            "✓ {} -> {} (score {}, {}) [{}]",
            report.company_name,
            report.status,
            report.score,
            report.band.as_str(),
            report.summary()
        );
        Ok(report)
    }

    async fn save_ledger(&self, identity: &IdentityKey, ledger: &AttemptLedger) {
        if let Err(e) = self.store.save_ledger(identity, ledger).await {
            tracing::warn!("Failed to save attempt ledger for {}: {}", identity, e);
        }
    }

    /// Verify the best email when it is new or has no verdict yet.
    async fn verify_email(
        &self,
        existing: Option<&Prospect>,
        preview: &Prospect,
        ledger: &mut AttemptLedger,
    ) -> Option<PartialRecord> {
        let verifier = self.verifier.as_ref()?;
        let email = preview.email.as_deref()?;

        let already_verified = existing.is_some_and(|p| {
            p.email.as_deref() == Some(email)
                && p.email_status
                    .as_deref()
                    .is_some_and(|s| s != EmailStatus::Unknown.as_str())
        });
        if already_verified {
            return None;
        }

        let result = match tokio::time::timeout(self.call_timeout, verifier.verify(email)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::TransientNetwork("email verification timed out".into())),
        };
        match result {
            Ok(status) => {
                ledger.source_mut(SourceId::Verifier).record_success();
                Some(PartialRecord::new(SourceId::Verifier).with_text(Field::EmailStatus, status.as_str()))
            }
            Err(e) => {
                tracing::warn!("Email verification failed for {}: {}", email, e);
                ledger
                    .source_mut(SourceId::Verifier)
                    .record_failure(e.error_kind(), &e.to_string());
                None
            }
        }
    }

    /// Selection reason and service proposal, from the generator or the
    /// static fallback. Same upgrade rule as the message.
    async fn analyse_relevance(
        &self,
        preview: &Prospect,
        ledger: &mut AttemptLedger,
    ) -> Option<PartialRecord> {
        let has_generated = preview.has(Field::SelectionReason)
            && preview
                .field_sources
                .get(&Field::SelectionReason)
                .is_some_and(|p| p.class > 0);
        if has_generated {
            return None;
        }

        if let Some(generator) = &self.generator {
            let call = generator.analyse(preview, &self.service_offered, &self.sector);
            let result = match tokio::time::timeout(self.call_timeout, call).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::TransientNetwork("relevance analysis timed out".into())),
            };
            match result {
                Ok(analysis) => {
                    ledger.source_mut(SourceId::Generator).record_success();
                    return Some(analysis_record(analysis, Quality::Verified));
                }
                Err(e) => {
                    tracing::warn!(
                        "Relevance analysis failed for {}, using fallback: {}",
                        preview.company_name,
                        e
                    );
                    ledger
                        .source_mut(SourceId::Generator)
                        .record_failure(e.error_kind(), &e.to_string());
                }
            }
        }

        if preview.has(Field::SelectionReason) {
            return None;
        }
        Some(analysis_record(
            RelevanceAnalysis::fallback(&self.service_offered),
            Quality::Unverified,
        ))
    }

    /// Generated message, or the template rendering when generation is unavailable.
    ///
    /// A generated message is never replaced; a template one is upgraded as
    /// soon as the generator answers.
    async fn write_message(
        &self,
        preview: &Prospect,
        ledger: &mut AttemptLedger,
    ) -> Option<PartialRecord> {
        let has_generated = preview.has(Field::Message)
            && preview
                .field_sources
                .get(&Field::Message)
                .is_some_and(|p| p.class > 0);
        if has_generated {
            return None;
        }

        if let Some(generator) = &self.generator {
            let result =
                match tokio::time::timeout(self.call_timeout, generator.generate(preview)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::TransientNetwork("message generation timed out".into())),
                };
            match result {
                Ok(generated) => {
                    ledger.source_mut(SourceId::Generator).record_success();
                    return Some(message_record(generated, Quality::Verified));
                }
                Err(e) => {
                    tracing::warn!(
                        "Message generation failed for {}, using template: {}",
                        preview.company_name,
                        e
                    );
                    ledger
                        .source_mut(SourceId::Generator)
                        .record_failure(e.error_kind(), &e.to_string());
                }
            }
        }

        if preview.has(Field::Message) {
            return None;
        }
        let rendered = self
            .template
            .render(preview, preview.specific_point.as_deref());
        Some(message_record(rendered, Quality::Unverified))
    }
}

fn message_record(message: GeneratedMessage, quality: Quality) -> PartialRecord {
    PartialRecord::new(SourceId::Generator)
        .with(Field::Message, FieldData::Text(message.message), quality)
        .with(Field::SpecificPoint, FieldData::Text(message.specific_point), quality)
}

fn analysis_record(analysis: RelevanceAnalysis, quality: Quality) -> PartialRecord {
    PartialRecord::new(SourceId::Generator)
        .with(Field::SelectionReason, FieldData::Text(analysis.selection_reason), quality)
        .with(Field::ServiceProposal, FieldData::Text(analysis.service_proposal), quality)
}

fn report(identity: &IdentityKey, stored: &Prospect, orchestration: &Orchestration) -> CandidateReport {
    CandidateReport {
        identity: identity.key(),
        company_name: stored.company_name.clone(),
        prospect_id: stored.id,
        outcomes: orchestration
            .outcomes
            .iter()
            .map(|(source, outcome)| (*source, outcome.label()))
            .collect(),
        successes: orchestration.successes(),
        status: stored.status,
        score: stored.score,
        band: stored.band(),
    }
}
