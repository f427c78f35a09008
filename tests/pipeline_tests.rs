/// End-to-end processing against scripted sources and the in-memory store
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use prospect_agent::errors::{AppError, SourceError};
use prospect_agent::merger::FieldMerger;
use prospect_agent::models::{
    AttemptLedger, Candidate, Field, FieldData, IdentityKey, Locale, PartialRecord, Prospect,
    ProspectFilter, ProspectStatus, Quality, SourceId, StoreStats,
};
use prospect_agent::openai_client::MessageTemplate;
use prospect_agent::orchestrator::{RequiredFields, SourceOrchestrator};
use prospect_agent::pipeline::Pipeline;
use prospect_agent::scheduler::{Scheduler, SchedulerSettings, TickOutcome};
use prospect_agent::scoring::RelevanceScorer;
use prospect_agent::sources::{
    DiscoverySource, EmailStatus, EmailVerifier, GeneratedMessage, MessageGenerator,
    RelevanceAnalysis, SourceClient, SourceRole,
};
use prospect_agent::store::{MemoryProspectStore, ProspectMutation, ProspectStore};

// ============ Fakes ============

struct Scripted {
    id: SourceId,
    role: SourceRole,
    reply: Result<Option<PartialRecord>, SourceError>,
    calls: AtomicUsize,
}

impl Scripted {
    fn contact(id: SourceId, reply: Result<Option<PartialRecord>, SourceError>) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: SourceRole::Contact,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn enrichment(id: SourceId, reply: Result<Option<PartialRecord>, SourceError>) -> Arc<Self> {
        Arc::new(Self {
            id,
            role: SourceRole::Enrichment,
            reply,
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
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
        self.reply.clone()
    }
}

/// Records when each candidate reaches the source.
#[derive(Default)]
struct Clocked {
    seen: Mutex<Vec<(String, Instant)>>,
}

impl Clocked {
    fn seen(&self) -> Vec<(String, Instant)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for Clocked {
    fn id(&self) -> SourceId {
        SourceId::Maps
    }

    fn role(&self) -> SourceRole {
        SourceRole::Enrichment
    }

    async fn lookup(&self, candidate: &Candidate) -> Result<Option<PartialRecord>, SourceError> {
        self.seen
            .lock()
            .unwrap()
            .push((candidate.company_name.clone(), Instant::now()));
        Ok(Some(PartialRecord::new(SourceId::Maps).with_text(Field::Phone, "+41 22 310 00 00")))
    }
}

struct CountingVerifier {
    status: EmailStatus,
    calls: AtomicUsize,
}

#[async_trait]
impl EmailVerifier for CountingVerifier {
    async fn verify(&self, _email: &str) -> Result<EmailStatus, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

#[derive(Default)]
struct CountingGenerator {
    fail: bool,
    calls: AtomicUsize,
    analyses: AtomicUsize,
}

impl CountingGenerator {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl MessageGenerator for CountingGenerator {
    async fn generate(&self, prospect: &Prospect) -> Result<GeneratedMessage, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::RateLimited("quota exceeded".into()));
        }
        Ok(GeneratedMessage {
            message: format!("Bonjour, un mot pour {}", prospect.company_name),
            specific_point: "vos avis clients".into(),
        })
    }

    async fn analyse(
        &self,
        prospect: &Prospect,
        service_offered: &str,
        _sector: &str,
    ) -> Result<RelevanceAnalysis, SourceError> {
        self.analyses.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::RateLimited("quota exceeded".into()));
        }
        Ok(RelevanceAnalysis {
            selection_reason: format!("{} n'a pas de site mobile", prospect.company_name),
            service_proposal: format!("Refonte avec {}", service_offered),
        })
    }
}

struct FixedDiscovery {
    candidates: Vec<Candidate>,
    calls: AtomicUsize,
}

#[async_trait]
impl DiscoverySource for FixedDiscovery {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn search(&self, _: &str, _: &Locale, limit: usize) -> Result<Vec<Candidate>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.candidates.iter().take(limit).cloned().collect())
    }
}

/// Memory store whose writes fail for one company.
struct FlakyStore {
    inner: MemoryProspectStore,
    broken_name: String,
}

#[async_trait]
impl ProspectStore for FlakyStore {
    async fn find_by_identity(&self, identity: &IdentityKey) -> Result<Option<Prospect>, AppError> {
        self.inner.find_by_identity(identity).await
    }

    async fn upsert(
        &self,
        identity: &IdentityKey,
        mutation: ProspectMutation,
    ) -> Result<Prospect, AppError> {
        if identity.normalized_name == self.broken_name {
            return Err(AppError::DatabaseError(sqlx::Error::PoolTimedOut));
        }
        self.inner.upsert(identity, mutation).await
    }

    async fn list(&self, filter: &ProspectFilter) -> Result<Vec<Prospect>, AppError> {
        self.inner.list(filter).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Prospect>, AppError> {
        self.inner.get(id).await
    }

    async fn update_status(&self, id: Uuid, status: ProspectStatus) -> Result<Prospect, AppError> {
        self.inner.update_status(id, status).await
    }

    async fn load_ledger(&self, identity: &IdentityKey) -> Result<AttemptLedger, AppError> {
        self.inner.load_ledger(identity).await
    }

    async fn save_ledger(
        &self,
        identity: &IdentityKey,
        ledger: &AttemptLedger,
    ) -> Result<(), AppError> {
        self.inner.save_ledger(identity, ledger).await
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        self.inner.stats().await
    }
}

// ============ Helpers ============

fn geneva() -> Locale {
    Locale::new("Genève", "Suisse")
}

fn acme() -> Candidate {
    Candidate::new("Acme SA", Some("https://acme.ch".into()), geneva(), "maps")
}

fn template() -> MessageTemplate {
    MessageTemplate::new("Bonjour {contact}, {company}: {specific_point}. {value_proposition}", "Sites web pour PME.")
}

fn email_and_phone() -> RequiredFields {
    RequiredFields::parse("email,phone").unwrap()
}

fn pipeline_with(store: Arc<dyn ProspectStore>, clients: Vec<Arc<dyn SourceClient>>) -> Pipeline {
    let orchestrator = SourceOrchestrator::new(clients, email_and_phone(), Duration::from_secs(2), 3);
    Pipeline::new(
        store,
        orchestrator,
        FieldMerger::default(),
        RelevanceScorer::default(),
        template(),
    )
    .with_call_timeout(Duration::from_secs(2))
}

fn apollo_record() -> PartialRecord {
    PartialRecord::new(SourceId::Apollo)
        .with_text(Field::PersonName, "Jean Dupont")
        .with_text(Field::PersonTitle, "Directeur")
        .with_text(Field::Phone, "+41 22 310 12 34")
        .with_text(Field::CompanySize, "11-50")
}

fn hunter_record() -> PartialRecord {
    PartialRecord::new(SourceId::Hunter).with_text(Field::Email, "j.dupont@acme.ch")
}

fn website_record() -> PartialRecord {
    PartialRecord::new(SourceId::Website)
        .with_text(Field::Email, "info@acme.ch")
        .with(Field::Technologies, FieldData::List(vec!["wordpress".into()]), Quality::Unverified)
}

fn fields_of(prospect: &Prospect) -> Vec<(Field, Option<FieldData>)> {
    Field::ALL.iter().map(|f| (*f, prospect.field(*f))).collect()
}

fn settings(max_candidate_attempts: u32) -> SchedulerSettings {
    SchedulerSettings {
        interval: Duration::from_millis(5),
        max_candidate_attempts,
        discovery_backoff_base: Duration::from_millis(5),
        discovery_backoff_max: Duration::from_millis(20),
        discovery_limit: 10,
        targets: vec!["boulangerie".into()],
        locale: geneva(),
    }
}

// ============ Pipeline ============

#[tokio::test]
async fn test_acme_is_enriched_from_several_sources() {
    let store = Arc::new(MemoryProspectStore::new());
    let apollo = Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record())));
    let hunter = Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record())));
    let website = Scripted::enrichment(SourceId::Website, Ok(Some(website_record())));
    let pipeline = pipeline_with(
        store.clone(),
        vec![apollo.clone(), hunter.clone(), website.clone()],
    );

    let report = pipeline.process(&acme()).await.unwrap();

    assert_eq!(report.status, ProspectStatus::Scored);
    assert_eq!(report.successes, 3);
    assert_eq!(store.len().await, 1);

    let row = store.get(report.prospect_id).await.unwrap().unwrap();
    assert_eq!(row.domain.as_deref(), Some("acme.ch"));
    assert_eq!(row.decision_maker_name.as_deref(), Some("Jean Dupont"));
    // A named mailbox beats the role mailbox found on the website
    assert_eq!(row.email.as_deref(), Some("j.dupont@acme.ch"));
    assert!(row.phone.is_some());
    assert_eq!(row.technologies, vec!["wordpress".to_string()]);
    assert_eq!(row.field_sources[&Field::Email].source, SourceId::Hunter);
    assert!(row.outreach_message.as_deref().unwrap().contains("Jean Dupont"));
    assert!(row.score > 0);
    assert!(row.processed_at.is_some());
}

#[tokio::test]
async fn test_contact_sources_stop_once_required_fields_are_found() {
    let store = Arc::new(MemoryProspectStore::new());
    let apollo = Scripted::contact(
        SourceId::Apollo,
        Ok(Some(apollo_record().with_text(Field::Email, "j.dupont@acme.ch"))),
    );
    let hunter = Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record())));
    let website = Scripted::enrichment(SourceId::Website, Ok(Some(website_record())));
    let pipeline = pipeline_with(store, vec![apollo.clone(), hunter.clone(), website.clone()]);

    let report = pipeline.process(&acme()).await.unwrap();

    assert_eq!(hunter.calls(), 0);
    assert_eq!(website.calls(), 1);
    assert!(report.summary().contains("hunter=skipped:early_stop"));
}

#[tokio::test]
async fn test_processing_twice_converges_on_one_row() {
    let store = Arc::new(MemoryProspectStore::new());
    let clients: Vec<Arc<dyn SourceClient>> = vec![
        Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record()))),
        Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record()))),
        Scripted::enrichment(SourceId::Website, Ok(Some(website_record()))),
    ];
    let pipeline = pipeline_with(store.clone(), clients);

    let first = pipeline.process(&acme()).await.unwrap();
    let after_first = store.get(first.prospect_id).await.unwrap().unwrap();
    let second = pipeline.process(&acme()).await.unwrap();
    let after_second = store.get(second.prospect_id).await.unwrap().unwrap();

    assert_eq!(first.prospect_id, second.prospect_id);
    assert_eq!(store.len().await, 1);
    assert_eq!(fields_of(&after_first), fields_of(&after_second));
    assert_eq!(after_first.score, after_second.score);
    assert_eq!(after_first.created_at, after_second.created_at);

    // Same company, spelled differently and reached through another URL
    let variant = Candidate::new("ACME S.A.", Some("https://www.acme.ch/fr".into()), geneva(), "search");
    let third = pipeline.process(&variant).await.unwrap();
    assert_eq!(third.prospect_id, first.prospect_id);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_all_sources_failing_is_insufficient_data() {
    let store = Arc::new(MemoryProspectStore::new());
    let clients: Vec<Arc<dyn SourceClient>> = vec![
        Scripted::contact(SourceId::Apollo, Err(SourceError::TransientNetwork("reset".into()))),
        Scripted::contact(SourceId::Hunter, Err(SourceError::RateLimited("429".into()))),
        Scripted::enrichment(SourceId::Website, Ok(None)),
    ];
    let pipeline = pipeline_with(store.clone(), clients);

    let report = pipeline.process(&acme()).await.unwrap();
    assert_eq!(report.status, ProspectStatus::InsufficientData);
    assert_eq!(report.successes, 0);

    pipeline.process(&acme()).await.unwrap();
    assert_eq!(store.len().await, 1);

    let row = store.all().await.remove(0);
    assert_eq!(row.status, ProspectStatus::InsufficientData);
    assert!(row.outreach_message.is_none());
    assert!(row.selection_reason.is_none());
    assert!(row.service_proposal.is_none());
    assert_eq!(row.website.as_deref(), Some("https://acme.ch"));

    let ledger = store.load_ledger(&acme().identity()).await.unwrap();
    assert_eq!(ledger.source(SourceId::Apollo).unwrap().consecutive_failures, 2);
    assert_eq!(
        ledger.source(SourceId::Hunter).unwrap().last_error_kind.as_deref(),
        Some("rate_limited")
    );
}

#[tokio::test]
async fn test_late_success_upgrades_insufficient_data() {
    let store = Arc::new(MemoryProspectStore::new());
    let failing = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Hunter, Err(SourceError::TransientNetwork("reset".into())))],
    );
    failing.process(&acme()).await.unwrap();

    let working = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record())))],
    );
    let report = working.process(&acme()).await.unwrap();

    assert_eq!(report.status, ProspectStatus::Scored);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_verification_and_generation_run_once() {
    let store = Arc::new(MemoryProspectStore::new());
    let verifier = Arc::new(CountingVerifier {
        status: EmailStatus::Valid,
        calls: AtomicUsize::new(0),
    });
    let generator = Arc::new(CountingGenerator::default());
    let pipeline = pipeline_with(
        store.clone(),
        vec![
            Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record()))),
            Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record()))),
        ],
    )
    .with_verifier(verifier.clone())
    .with_generator(generator.clone())
    .with_targeting("SEO local", "boulangerie");

    let report = pipeline.process(&acme()).await.unwrap();
    pipeline.process(&acme()).await.unwrap();

    let row = store.get(report.prospect_id).await.unwrap().unwrap();
    assert_eq!(row.email_status.as_deref(), Some("valid"));
    assert_eq!(row.outreach_message.as_deref(), Some("Bonjour, un mot pour Acme SA"));
    assert_eq!(row.specific_point.as_deref(), Some("vos avis clients"));
    assert_eq!(verifier.calls.load(Ordering::SeqCst), 1);
    assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(row.selection_reason.as_deref(), Some("Acme SA n'a pas de site mobile"));
    assert_eq!(row.service_proposal.as_deref(), Some("Refonte avec SEO local"));
    assert_eq!(row.field_sources[&Field::SelectionReason].source, SourceId::Generator);
    assert_eq!(generator.analyses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_generation_failure_falls_back_to_template() {
    let store = Arc::new(MemoryProspectStore::new());
    let generator = Arc::new(CountingGenerator::failing());
    let pipeline = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record())))],
    )
    .with_generator(generator.clone());

    let report = pipeline.process(&acme()).await.unwrap();
    let row = store.get(report.prospect_id).await.unwrap().unwrap();

    assert_eq!(report.status, ProspectStatus::Scored);
    let message = row.outreach_message.unwrap();
    assert!(message.starts_with("Bonjour Jean Dupont, Acme SA"));
    assert_eq!(row.field_sources[&Field::Message].class, 0);
    assert_eq!(
        row.selection_reason.as_deref(),
        Some("PME locale qui pourrait bénéficier de nos services")
    );
    assert_eq!(row.field_sources[&Field::SelectionReason].class, 0);
    assert_eq!(generator.analyses.load(Ordering::SeqCst), 1);

    let ledger = store.load_ledger(&acme().identity()).await.unwrap();
    assert_eq!(
        ledger.source(SourceId::Generator).unwrap().last_error_kind.as_deref(),
        Some("rate_limited")
    );
}

#[tokio::test]
async fn test_fallback_analysis_is_upgraded_once_the_generator_answers() {
    let store = Arc::new(MemoryProspectStore::new());
    let offline = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record())))],
    )
    .with_targeting("création de sites web", "restaurants");
    let report = offline.process(&acme()).await.unwrap();

    let row = store.get(report.prospect_id).await.unwrap().unwrap();
    assert_eq!(
        row.selection_reason.as_deref(),
        Some("PME locale qui pourrait bénéficier de création de sites web")
    );
    assert_eq!(
        row.service_proposal.as_deref(),
        Some("Amélioration de leur présence digitale avec création de sites web")
    );

    let generator = Arc::new(CountingGenerator::default());
    let online = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record())))],
    )
    .with_generator(generator.clone())
    .with_targeting("création de sites web", "restaurants");
    online.process(&acme()).await.unwrap();
    online.process(&acme()).await.unwrap();

    let row = store.get(report.prospect_id).await.unwrap().unwrap();
    assert_eq!(row.selection_reason.as_deref(), Some("Acme SA n'a pas de site mobile"));
    assert_eq!(row.field_sources[&Field::ServiceProposal].class, 1);
    assert_eq!(generator.analyses.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_tail_status_survives_reprocessing() {
    let store = Arc::new(MemoryProspectStore::new());
    let pipeline = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Apollo, Ok(Some(apollo_record())))],
    );
    let report = pipeline.process(&acme()).await.unwrap();
    store
        .update_status(report.prospect_id, ProspectStatus::Contacted)
        .await
        .unwrap();

    let again = pipeline.process(&acme()).await.unwrap();
    assert_eq!(again.status, ProspectStatus::Contacted);
}

#[tokio::test]
async fn test_store_failure_commits_nothing() {
    let store = Arc::new(FlakyStore {
        inner: MemoryProspectStore::new(),
        broken_name: "acme".into(),
    });
    let pipeline = pipeline_with(
        store.clone(),
        vec![Scripted::contact(SourceId::Hunter, Ok(Some(hunter_record())))],
    );

    let err = pipeline.process(&acme()).await.unwrap_err();
    assert!(matches!(err, AppError::DatabaseError(_)));
    assert!(store.inner.is_empty().await);
    // Attempt counters of the calls that went out are kept
    let ledger = store.load_ledger(&acme().identity()).await.unwrap();
    assert_eq!(ledger.source(SourceId::Hunter).unwrap().attempts, 1);
}

// ============ Scheduler ============

fn scheduler_fixture(
    max_candidate_attempts: u32,
) -> (Scheduler, Arc<FlakyStore>, Arc<FixedDiscovery>) {
    let store = Arc::new(FlakyStore {
        inner: MemoryProspectStore::new(),
        broken_name: "broken".into(),
    });
    let pipeline = pipeline_with(
        store.clone(),
        vec![Scripted::enrichment(
            SourceId::Maps,
            Ok(Some(PartialRecord::new(SourceId::Maps).with_text(Field::Phone, "+41 22 310 00 00"))),
        )],
    );
    let discovery = Arc::new(FixedDiscovery {
        candidates: vec![
            Candidate::new("Broken", None, geneva(), "fixed"),
            Candidate::new("Boulangerie Dupont", Some("https://dupont-pain.ch".into()), geneva(), "fixed"),
            Candidate::new("Boulangerie Dupont SA", Some("https://www.dupont-pain.ch".into()), geneva(), "fixed"),
        ],
        calls: AtomicUsize::new(0),
    });
    let scheduler = Scheduler::new(
        Arc::new(pipeline),
        discovery.clone(),
        settings(max_candidate_attempts),
    );
    (scheduler, store, discovery)
}

#[tokio::test]
async fn test_scheduler_continues_after_failures() {
    let (mut scheduler, store, discovery) = scheduler_fixture(2);

    // Refill dedups the two spellings of the same bakery
    let failed = scheduler.tick().await;
    match &failed {
        TickOutcome::Failed { requeued, kind, .. } => {
            assert!(*requeued);
            assert_eq!(*kind, "store_error");
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert_eq!(scheduler.queue_len(), 2);
    // A failed cycle waits the same fixed interval as a successful one
    assert_eq!(scheduler.delay_after(&failed), Duration::from_millis(5));

    let processed = scheduler.tick().await;
    assert!(matches!(processed, TickOutcome::Processed(_)));
    assert_eq!(scheduler.delay_after(&processed), Duration::from_millis(5));

    match scheduler.tick().await {
        TickOutcome::Failed { requeued, .. } => assert!(!requeued),
        other => panic!("expected the second failure, got {:?}", other),
    }
    assert_eq!(scheduler.queue_len(), 0);

    // Nothing new: the bakery is stored and the broken one abandoned
    assert!(matches!(scheduler.tick().await, TickOutcome::Idle { discovery_error: None }));
    assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.processed(), 1);
    assert_eq!(store.inner.len().await, 1);

    let ledger = store
        .load_ledger(&IdentityKey::new("Broken", None))
        .await
        .unwrap();
    assert_eq!(ledger.pipeline.consecutive_failures, 2);
}

#[tokio::test]
async fn test_scheduler_stops_on_shutdown() {
    let (scheduler, store, _) = scheduler_fixture(3);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(200)).await;
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("scheduler did not stop")
        .unwrap();
    assert_eq!(store.inner.len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn test_next_candidate_waits_the_fixed_interval_after_a_failure() {
    let interval = Duration::from_secs(120);
    let store = Arc::new(FlakyStore {
        inner: MemoryProspectStore::new(),
        broken_name: "broken".into(),
    });
    let clocked = Arc::new(Clocked::default());
    let pipeline = pipeline_with(store.clone(), vec![clocked.clone()]);
    let discovery = Arc::new(FixedDiscovery {
        candidates: vec![
            Candidate::new("Broken", None, geneva(), "fixed"),
            Candidate::new("Boulangerie Dupont", Some("https://dupont-pain.ch".into()), geneva(), "fixed"),
        ],
        calls: AtomicUsize::new(0),
    });
    let mut settings = settings(1);
    settings.interval = interval;
    let scheduler = Scheduler::new(Arc::new(pipeline), discovery, settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(scheduler.run(shutdown_rx));
    for _ in 0..600 {
        if clocked.seen().len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    let seen = clocked.seen();
    assert_eq!(seen.len(), 2, "both candidates should reach the source once");
    assert_eq!(seen[0].0, "Broken");
    assert_eq!(seen[1].0, "Boulangerie Dupont");
    let gap = seen[1].1 - seen[0].1;
    assert!(gap >= interval, "second dequeue after {:?}", gap);
    assert!(gap < interval + Duration::from_secs(1), "second dequeue after {:?}", gap);
    assert_eq!(store.inner.len().await, 1);
}
