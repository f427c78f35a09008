//! Source Orchestrator: runs the ordered fallback chain for one candidate.
//!
//! Contact sources gate on the required-field predicate and are skipped once
//! it holds; enrichment sources are always consulted. A failing source never
//! aborts the chain.
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::SourceGuard;
use crate::errors::SourceError;
use crate::models::{AttemptLedger, Candidate, Field, PartialRecord, SourceId};
use crate::sources::{SkipReason, SourceClient, SourceOutcome, SourceRole};

/// Consecutive failures (across candidates) before a source's breaker opens.
const BREAKER_THRESHOLD: u32 = 5;

/// Pacing assumed until `with_pacing` is called; matches the default processing interval.
const DEFAULT_PACING: Duration = Duration::from_secs(120);

/// Early-stop predicate: every group must be satisfied by at least one of its
/// alternative fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredFields {
    groups: Vec<Vec<Field>>,
}

impl Default for RequiredFields {
    /// One contact channel: email or phone.
    fn default() -> Self {
        Self {
            groups: vec![vec![Field::Email, Field::Phone]],
        }
    }
}

impl RequiredFields {
    pub fn new(groups: Vec<Vec<Field>>) -> Self {
        Self { groups }
    }

    /// Parse `email|phone,person_name`: groups split by `,`, alternatives by `|`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let mut groups = Vec::new();
        for group in raw.split(',').map(str::trim).filter(|g| !g.is_empty()) {
            let alternatives = group
                .split('|')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::parse::<Field>)
                .collect::<Result<Vec<_>, _>>()?;
            if !alternatives.is_empty() {
                groups.push(alternatives);
            }
        }
        if groups.is_empty() {
            return Err("at least one required field group is needed".to_string());
        }
        Ok(Self { groups })
    }

    pub fn groups(&self) -> &[Vec<Field>] {
        &self.groups
    }

    pub fn is_satisfied(&self, has: impl Fn(Field) -> bool) -> bool {
        self.groups.iter().all(|group| group.iter().any(|f| has(*f)))
    }

    /// Whether the records gathered so far satisfy every group.
    pub fn satisfied_by(&self, records: &[PartialRecord]) -> bool {
        self.is_satisfied(|field| records.iter().any(|r| r.get(field).is_some()))
    }
}

/// Result of one orchestration pass.
#[derive(Debug, Clone, Default)]
pub struct Orchestration {
    /// Outcome per chain source, in chain order.
    pub outcomes: Vec<(SourceId, SourceOutcome)>,
}

impl Orchestration {
    /// Successful records in chain order.
    pub fn records(&self) -> Vec<PartialRecord> {
        self.outcomes
            .iter()
            .filter_map(|(_, outcome)| match outcome {
                SourceOutcome::Success(record) => Some(record.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failures(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SourceOutcome::Failure(_)))
            .count()
    }

    /// `apollo=success(4) hunter=skipped:early_stop ...`
    pub fn summary(&self) -> String {
        self.outcomes
            .iter()
            .map(|(source, outcome)| format!("{}={}", source, outcome.label()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

struct ChainEntry {
    client: Arc<dyn SourceClient>,
    guard: SourceGuard,
}

pub struct SourceOrchestrator {
    chain: Vec<ChainEntry>,
    required: RequiredFields,
    timeout: Duration,
    max_source_failures: u32,
}

impl SourceOrchestrator {
    /// Build the chain. Clients are consulted in the order given.
    pub fn new(
        clients: Vec<Arc<dyn SourceClient>>,
        required: RequiredFields,
        timeout: Duration,
        max_source_failures: u32,
    ) -> Self {
        let chain = clients
            .into_iter()
            .map(|client| ChainEntry {
                guard: SourceGuard::new(client.id(), BREAKER_THRESHOLD, DEFAULT_PACING),
                client,
            })
            .collect();
        Self {
            chain,
            required,
            timeout,
            max_source_failures: max_source_failures.max(1),
        }
    }

    /// Scale breaker and rate-limit backoffs to the delay between candidates.
    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        for entry in &mut self.chain {
            entry.guard = SourceGuard::new(entry.client.id(), BREAKER_THRESHOLD, pacing);
        }
        self
    }

    pub fn sources(&self) -> Vec<SourceId> {
        self.chain.iter().map(|e| e.client.id()).collect()
    }

    pub fn required(&self) -> &RequiredFields {
        &self.required
    }

    /// Consult every source of the chain for `candidate`.
    ///
    /// # Arguments
    ///
    /// * `candidate` - The company being enriched.
    /// * `ledger` - Attempt counters loaded from the store; updated for every call made.
    ///
    /// # Returns
    ///
    /// * `(Orchestration, AttemptLedger)` - Per-source outcomes and the updated ledger.
    pub async fn enrich(
        &self,
        candidate: &Candidate,
        mut ledger: AttemptLedger,
    ) -> (Orchestration, AttemptLedger) {
        let mut outcomes = Vec::with_capacity(self.chain.len());
        let mut gathered: Vec<PartialRecord> = Vec::new();

        for entry in &self.chain {
            let source = entry.client.id();

            if entry.client.role() == SourceRole::Contact && self.required.satisfied_by(&gathered) {
                outcomes.push((source, SourceOutcome::Skipped(SkipReason::EarlyStop)));
                continue;
            }

            let exhausted = ledger
                .source(source)
                .is_some_and(|r| r.consecutive_failures >= self.max_source_failures);
            if exhausted {
                tracing::debug!(
                    "Skipping {} for {}: {} consecutive failures",
                    source,
                    candidate.company_name,
                    self.max_source_failures
                );
                outcomes.push((source, SourceOutcome::Skipped(SkipReason::Exhausted)));
                continue;
            }

            if let Err(e) = entry.guard.check() {
                let reason = match e {
                    SourceError::Disabled(_) => SkipReason::Disabled,
                    SourceError::CoolingDown(_) => SkipReason::CoolingDown,
                    _ => SkipReason::CircuitOpen,
                };
                outcomes.push((source, SourceOutcome::Skipped(reason)));
                continue;
            }

            let outcome = self.call(entry, candidate).await;
            match &outcome {
                SourceOutcome::Success(record) => {
                    entry.guard.record_success();
                    ledger.source_mut(source).record_success();
                    gathered.push(record.clone());
                }
                SourceOutcome::Empty => {
                    entry.guard.record_success();
                    ledger.source_mut(source).record_success();
                }
                SourceOutcome::Failure(e) => {
                    entry.guard.record_failure(e);
                    ledger
                        .source_mut(source)
                        .record_failure(e.error_kind(), &e.to_string());
                    tracing::warn!(
                        "Source {} failed for {} ({}): {}",
                        source,
                        candidate.identity(),
                        e.error_kind(),
                        e
                    );
                }
                SourceOutcome::Skipped(_) => {}
            }
            outcomes.push((source, outcome));
        }

        (Orchestration { outcomes }, ledger)
    }

    async fn call(&self, entry: &ChainEntry, candidate: &Candidate) -> SourceOutcome {
        let source = entry.client.id();
        let result = match tokio::time::timeout(self.timeout, entry.client.lookup(candidate)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::TransientNetwork(format!(
                "{} timed out after {}s",
                source,
                self.timeout.as_secs_f32()
            ))),
        };

        match result {
            Ok(Some(mut record)) if !record.is_empty() => {
                // Attribution is decided by the chain, not by the adapter
                record.source = source;
                SourceOutcome::Success(record)
            }
            Ok(_) => SourceOutcome::Empty,
            Err(e) => SourceOutcome::Failure(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Locale;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Scripted {
        id: SourceId,
        role: SourceRole,
        reply: Result<Option<PartialRecord>, SourceError>,
        delay: Option<Duration>,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(id: SourceId, reply: Result<Option<PartialRecord>, SourceError>) -> Self {
            Self {
                id,
                role: SourceRole::Contact,
                reply,
                delay: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn enrichment(mut self) -> Self {
            self.role = SourceRole::Enrichment;
            self
        }
    }

    #[async_trait]
    impl SourceClient for Scripted {
        fn id(&self) -> SourceId {
            self.id
        }

        fn role(&self) -> SourceRole {
            self.role
        }

        async fn lookup(&self, _candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.clone()
        }
    }

    fn candidate() -> Candidate {
        Candidate::new("Acme SA", Some("https://acme.ch".into()), Locale::new("Genève", "Suisse"), "search")
    }

    fn orchestrator(clients: Vec<Arc<dyn SourceClient>>) -> SourceOrchestrator {
        SourceOrchestrator::new(clients, RequiredFields::default(), Duration::from_secs(2), 3)
    }

    #[test]
    fn test_required_fields_parse() {
        let required = RequiredFields::parse("email|phone, person_name").unwrap();
        assert_eq!(
            required.groups(),
            &[vec![Field::Email, Field::Phone], vec![Field::PersonName]]
        );
        assert!(required.is_satisfied(|f| matches!(f, Field::Phone | Field::PersonName)));
        assert!(!required.is_satisfied(|f| f == Field::Email));
        assert!(RequiredFields::parse("email|fax").is_err());
        assert!(RequiredFields::parse(" , ").is_err());
    }

    #[tokio::test]
    async fn test_contact_sources_stop_early_but_enrichment_runs() {
        let apollo = Arc::new(Scripted::new(
            SourceId::Apollo,
            Ok(Some(PartialRecord::new(SourceId::Apollo).with_text(Field::Email, "j.dupont@acme.ch"))),
        ));
        let hunter = Arc::new(Scripted::new(SourceId::Hunter, Ok(None)));
        let maps = Arc::new(
            Scripted::new(
                SourceId::Maps,
                Ok(Some(PartialRecord::new(SourceId::Maps).with_verified_text(Field::Phone, "+41 22 000 00 00"))),
            )
            .enrichment(),
        );
        let orch = orchestrator(vec![apollo.clone(), hunter.clone(), maps.clone()]);

        let (result, ledger) = orch.enrich(&candidate(), AttemptLedger::default()).await;

        assert_eq!(hunter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(maps.calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.successes(), 2);
        assert_eq!(result.summary(), "apollo=success(1) hunter=skipped:early_stop maps=success(1)");
        assert!(ledger.source(SourceId::Hunter).is_none());
        assert_eq!(ledger.source(SourceId::Apollo).unwrap().attempts, 1);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_chain() {
        let apollo = Arc::new(Scripted::new(
            SourceId::Apollo,
            Err(SourceError::RateLimited("quota".into())),
        ));
        let hunter = Arc::new(Scripted::new(
            SourceId::Hunter,
            Ok(Some(PartialRecord::new(SourceId::Hunter).with_text(Field::Email, "info@acme.ch"))),
        ));
        let orch = orchestrator(vec![apollo, hunter]);

        let (result, ledger) = orch.enrich(&candidate(), AttemptLedger::default()).await;

        assert_eq!(result.failures(), 1);
        assert_eq!(result.records().len(), 1);
        let apollo_attempts = ledger.source(SourceId::Apollo).unwrap();
        assert_eq!(apollo_attempts.consecutive_failures, 1);
        assert_eq!(apollo_attempts.last_error_kind.as_deref(), Some("rate_limited"));
    }

    #[tokio::test]
    async fn test_timeout_is_transient_failure() {
        let mut slow = Scripted::new(SourceId::Hunter, Ok(None));
        slow.delay = Some(Duration::from_millis(200));
        let orch = SourceOrchestrator::new(
            vec![Arc::new(slow)],
            RequiredFields::default(),
            Duration::from_millis(20),
            3,
        );

        let (result, _) = orch.enrich(&candidate(), AttemptLedger::default()).await;

        assert!(matches!(
            result.outcomes[0].1,
            SourceOutcome::Failure(SourceError::TransientNetwork(_))
        ));
    }

    #[tokio::test]
    async fn test_exhausted_source_is_skipped() {
        let hunter = Arc::new(Scripted::new(SourceId::Hunter, Ok(None)));
        let orch = orchestrator(vec![hunter.clone()]);
        let mut ledger = AttemptLedger::default();
        for _ in 0..3 {
            ledger.source_mut(SourceId::Hunter).record_failure("transient_network", "reset");
        }

        let (result, _) = orch.enrich(&candidate(), ledger).await;

        assert_eq!(hunter.calls.load(Ordering::SeqCst), 0);
        assert_eq!(result.outcomes[0].1, SourceOutcome::Skipped(SkipReason::Exhausted));
    }

    #[tokio::test]
    async fn test_auth_error_disables_source_for_later_candidates() {
        let apollo = Arc::new(Scripted::new(SourceId::Apollo, Err(SourceError::Auth("401".into()))));
        let orch = orchestrator(vec![apollo.clone()]);

        orch.enrich(&candidate(), AttemptLedger::default()).await;
        let (second, _) = orch.enrich(&candidate(), AttemptLedger::default()).await;

        assert_eq!(apollo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.outcomes[0].1, SourceOutcome::Skipped(SkipReason::Disabled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_source_skipped_for_next_candidate() {
        let pacing = Duration::from_secs(120);
        let apollo = Arc::new(Scripted::new(
            SourceId::Apollo,
            Err(SourceError::RateLimited("429".into())),
        ));
        let hunter = Arc::new(Scripted::new(SourceId::Hunter, Ok(None)));
        let orch = orchestrator(vec![apollo.clone(), hunter.clone()]).with_pacing(pacing);
        let other = Candidate::new("Beta Sàrl", Some("beta.ch".into()), Locale::new("Genève", "Suisse"), "search");

        orch.enrich(&candidate(), AttemptLedger::default()).await;
        tokio::time::advance(Duration::from_secs(60)).await;
        let (second, ledger) = orch.enrich(&other, AttemptLedger::default()).await;

        assert_eq!(apollo.calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.summary(), "apollo=skipped:cooling_down hunter=empty");
        assert!(ledger.source(SourceId::Apollo).is_none());

        tokio::time::advance(pacing).await;
        let (third, _) = orch.enrich(&other, AttemptLedger::default()).await;
        assert_eq!(apollo.calls.load(Ordering::SeqCst), 2);
        assert_eq!(third.failures(), 1);
    }

    #[tokio::test]
    async fn test_record_attributed_to_chain_source() {
        let hunter = Arc::new(Scripted::new(
            SourceId::Hunter,
            Ok(Some(PartialRecord::new(SourceId::Apollo).with_text(Field::Email, "a@acme.ch"))),
        ));
        let orch = orchestrator(vec![hunter]);
        let (result, _) = orch.enrich(&candidate(), AttemptLedger::default()).await;
        assert_eq!(result.records()[0].source, SourceId::Hunter);
    }
}
