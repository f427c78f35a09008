use std::env;
use uuid::Uuid;

use prospect_agent::db::Database;
use prospect_agent::db_storage::PgProspectStore;
use prospect_agent::errors::AppError;
use prospect_agent::merger::FieldMerger;
use prospect_agent::models::{
    Candidate, Field, Locale, PartialRecord, Prospect, ProspectFilter, ProspectStatus, SourceId,
};
use prospect_agent::store::ProspectStore;

async fn store() -> anyhow::Result<PgProspectStore> {
    let db_url = env::var("TEST_DATABASE_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| anyhow::anyhow!("Set TEST_DATABASE_URL or DATABASE_URL to run this test"))?;

    let db = Database::new(&db_url).await?;
    Ok(PgProspectStore::new(db.pool.clone()))
}

/// Unique company per run so repeated runs do not collide.
fn unique_candidate() -> Candidate {
    let tag = Uuid::new_v4().simple().to_string();
    Candidate::new(
        format!("Testbau {}", &tag[..8]),
        Some(format!("https://test-{}.ch", &tag[..12])),
        Locale::new("Genève", "Suisse"),
        "search",
    )
}

/// Upsert, re-resolution and status update against PostgreSQL.
/// Marked ignored to avoid running against production by accident; set TEST_DATABASE_URL to run.
#[tokio::test]
#[ignore]
async fn upsert_and_resolve_smoke_test() -> anyhow::Result<()> {
    let store = store().await?;
    let candidate = unique_candidate();
    let identity = candidate.identity();
    let merger = FieldMerger::default();

    let records = vec![PartialRecord::new(SourceId::Hunter).with_text(Field::Email, "anna.keller@example.ch")];
    let owned = candidate.clone();
    let first = store
        .upsert(
            &identity,
            Box::new(move |existing: Option<Prospect>| -> Result<Prospect, AppError> {
                let mut p = merger.merge(existing, &owned, &records);
                p.status = ProspectStatus::Scored;
                p.score = 42;
                Ok(p)
            }),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    assert_eq!(first.email.as_deref(), Some("anna.keller@example.ch"));
    assert_eq!(first.field_sources[&Field::Email].source, SourceId::Hunter);

    // Second write for the same identity lands on the same row
    let second = store
        .upsert(
            &identity,
            Box::new(|existing: Option<Prospect>| -> Result<Prospect, AppError> {
                existing.ok_or_else(|| AppError::InternalError("row should exist".into()))
            }),
        )
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(second.id, first.id);
    assert_eq!(second.created_at, first.created_at);

    let listed = store
        .list(&ProspectFilter {
            min_score: Some(40),
            status: Some(ProspectStatus::Scored),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert!(listed.iter().any(|p| p.id == first.id));

    let contacted = store
        .update_status(first.id, ProspectStatus::Contacted)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(contacted.status, ProspectStatus::Contacted);
    assert_eq!(contacted.score, 42);

    let rejected = store.update_status(first.id, ProspectStatus::Enriched).await;
    assert!(matches!(rejected, Err(AppError::InvalidTransition(_))));

    Ok(())
}

/// Attempt ledger persistence in the side table.
#[tokio::test]
#[ignore]
async fn attempt_ledger_smoke_test() -> anyhow::Result<()> {
    let store = store().await?;
    let identity = unique_candidate().identity();

    let mut ledger = store
        .load_ledger(&identity)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(ledger.pipeline.attempts, 0);

    ledger.source_mut(SourceId::Apollo).record_failure("rate_limited", "429");
    store
        .save_ledger(&identity, &ledger)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let failure = store
        .record_candidate_failure(&identity, "store_error", "pool timed out")
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(failure.consecutive_failures, 1);

    let reloaded = store
        .load_ledger(&identity)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;
    assert_eq!(
        reloaded.source(SourceId::Apollo).map(|r| r.consecutive_failures),
        Some(1)
    );
    assert_eq!(reloaded.pipeline.last_error_kind.as_deref(), Some("store_error"));

    Ok(())
}
