//! Prospect Store: deduplicated persistence of merged prospects plus the
//! per-candidate attempt side table.
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{
    AttemptLedger, AttemptRecord, IdentityKey, Prospect, ProspectFilter, ProspectStatus, StoreStats,
};

/// Mutation applied to the resolved row (or `None`) inside the store's atomic section.
pub type ProspectMutation =
    Box<dyn FnOnce(Option<Prospect>) -> Result<Prospect, AppError> + Send>;

#[async_trait]
pub trait ProspectStore: Send + Sync {
    /// Resolve the row designating `identity`: by domain first, then by name.
    async fn find_by_identity(&self, identity: &IdentityKey) -> Result<Option<Prospect>, AppError>;

    /// Atomically resolve, mutate and write the row for `identity`.
    ///
    /// Concurrent calls for the same company converge on one row. A failing
    /// mutation leaves the stored row untouched.
    async fn upsert(
        &self,
        identity: &IdentityKey,
        mutation: ProspectMutation,
    ) -> Result<Prospect, AppError>;

    async fn exists_by_identity(&self, name: &str, domain: Option<&str>) -> Result<bool, AppError> {
        let identity = IdentityKey::new(name, domain);
        Ok(self.find_by_identity(&identity).await?.is_some())
    }

    /// Rows accepted by `filter`, best score first.
    async fn list(&self, filter: &ProspectFilter) -> Result<Vec<Prospect>, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Prospect>, AppError>;

    /// Externally-driven status change, restricted to the tail states.
    async fn update_status(&self, id: Uuid, status: ProspectStatus) -> Result<Prospect, AppError>;

    async fn load_ledger(&self, identity: &IdentityKey) -> Result<AttemptLedger, AppError>;

    async fn save_ledger(
        &self,
        identity: &IdentityKey,
        ledger: &AttemptLedger,
    ) -> Result<(), AppError>;

    /// Count one failed pipeline cycle for the candidate.
    async fn record_candidate_failure(
        &self,
        identity: &IdentityKey,
        kind: &str,
        message: &str,
    ) -> Result<AttemptRecord, AppError> {
        let mut ledger = self.load_ledger(identity).await?;
        ledger.pipeline.record_failure(kind, message);
        self.save_ledger(identity, &ledger).await?;
        Ok(ledger.pipeline)
    }

    async fn stats(&self) -> Result<StoreStats, AppError>;
}

/// Pick the row designating `identity` among `rows`.
///
/// An equal domain wins. Otherwise an equal normalized name matches when
/// either side lacks a domain; the oldest such row is chosen.
pub fn resolve_identity<'a>(
    rows: impl IntoIterator<Item = &'a Prospect>,
    identity: &IdentityKey,
) -> Option<&'a Prospect> {
    let mut by_name: Option<&Prospect> = None;
    for row in rows {
        if identity.domain.is_some() && row.domain == identity.domain {
            return Some(row);
        }
        if row.identity().matches(identity) {
            let older = by_name.map_or(true, |current| {
                (row.created_at, row.id) < (current.created_at, current.id)
            });
            if older {
                by_name = Some(row);
            }
        }
    }
    by_name
}

/// Check an external status change against the state machine.
pub fn check_external_transition(
    prospect: &Prospect,
    target: ProspectStatus,
) -> Result<(), AppError> {
    if prospect.status.can_transition_externally(target) {
        return Ok(());
    }
    Err(AppError::InvalidTransition(format!(
        "{} cannot move from {} to {}",
        prospect.id, prospect.status, target
    )))
}

/// Keep the stored row's identity columns stable across a mutation.
fn pin_row(mut updated: Prospect, existing: Option<&Prospect>) -> Prospect {
    if let Some(existing) = existing {
        updated.id = existing.id;
        updated.created_at = existing.created_at;
    }
    updated
}

fn sort_for_listing(rows: &mut [Prospect]) {
    rows.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });
}

#[derive(Default)]
struct MemoryState {
    rows: HashMap<Uuid, Prospect>,
    ledgers: HashMap<String, AttemptLedger>,
}

/// In-process store with the same semantics as the PostgreSQL one.
#[derive(Default)]
pub struct MemoryProspectStore {
    state: RwLock<MemoryState>,
}

impl MemoryProspectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn all(&self) -> Vec<Prospect> {
        let mut rows: Vec<Prospect> = self.state.read().await.rows.values().cloned().collect();
        sort_for_listing(&mut rows);
        rows
    }
}

#[async_trait]
impl ProspectStore for MemoryProspectStore {
    async fn find_by_identity(&self, identity: &IdentityKey) -> Result<Option<Prospect>, AppError> {
        let state = self.state.read().await;
        Ok(resolve_identity(state.rows.values(), identity).cloned())
    }

    async fn upsert(
        &self,
        identity: &IdentityKey,
        mutation: ProspectMutation,
    ) -> Result<Prospect, AppError> {
        let mut state = self.state.write().await;
        let existing = resolve_identity(state.rows.values(), identity).cloned();

        let updated = pin_row(mutation(existing.clone())?, existing.as_ref());

        let clash = state
            .rows
            .values()
            .any(|row| row.id != updated.id && row.identity_key == updated.identity_key);
        if clash {
            return Err(AppError::InternalError(format!(
                "identity {} already belongs to another row",
                updated.identity_key
            )));
        }

        state.rows.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn list(&self, filter: &ProspectFilter) -> Result<Vec<Prospect>, AppError> {
        let state = self.state.read().await;
        let mut rows: Vec<Prospect> = state
            .rows
            .values()
            .filter(|p| filter.accepts(p))
            .cloned()
            .collect();
        sort_for_listing(&mut rows);
        if let Some(limit) = filter.limit {
            rows.truncate(limit.max(0) as usize);
        }
        Ok(rows)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Prospect>, AppError> {
        Ok(self.state.read().await.rows.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: ProspectStatus) -> Result<Prospect, AppError> {
        let mut state = self.state.write().await;
        let row = state
            .rows
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Prospect {} not found", id)))?;
        check_external_transition(row, status)?;
        row.status = status;
        Ok(row.clone())
    }

    async fn load_ledger(&self, identity: &IdentityKey) -> Result<AttemptLedger, AppError> {
        Ok(self
            .state
            .read()
            .await
            .ledgers
            .get(&identity.key())
            .cloned()
            .unwrap_or_default())
    }

    async fn save_ledger(
        &self,
        identity: &IdentityKey,
        ledger: &AttemptLedger,
    ) -> Result<(), AppError> {
        self.state
            .write()
            .await
            .ledgers
            .insert(identity.key(), ledger.clone());
        Ok(())
    }

    async fn stats(&self) -> Result<StoreStats, AppError> {
        let state = self.state.read().await;
        let mut stats = StoreStats::default();
        for row in state.rows.values() {
            stats.total += 1;
            if row.email.is_some() {
                stats.with_email += 1;
            }
            if row.status.rank() >= ProspectStatus::Scored.rank() {
                stats.scored += 1;
            }
            if row.status == ProspectStatus::InsufficientData {
                stats.insufficient_data += 1;
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Candidate, Locale};

    fn candidate(name: &str, website: Option<&str>) -> Candidate {
        Candidate::new(name, website.map(str::to_string), Locale::new("Genève", "Suisse"), "search")
    }

    fn insert(candidate: &Candidate) -> ProspectMutation {
        let candidate = candidate.clone();
        Box::new(move |existing| {
            Ok(existing.unwrap_or_else(|| Prospect::from_candidate(&candidate)))
        })
    }

    #[tokio::test]
    async fn test_upsert_same_identity_converges() {
        let store = MemoryProspectStore::new();
        let c = candidate("Acme SA", Some("https://acme.ch"));
        let first = store.upsert(&c.identity(), insert(&c)).await.unwrap();
        let second = store.upsert(&c.identity(), insert(&c)).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_resolve_by_name_when_domain_missing() {
        let store = MemoryProspectStore::new();
        let named = candidate("Acme SA", None);
        let row = store.upsert(&named.identity(), insert(&named)).await.unwrap();

        let with_domain = candidate("ACME S.A.", Some("acme.ch"));
        let found = store.find_by_identity(&with_domain.identity()).await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(row.id));
        assert!(store.exists_by_identity("acme", None).await.unwrap());
        assert!(!store.exists_by_identity("Acme", Some("acme-lausanne.ch")).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_row_untouched() {
        let store = MemoryProspectStore::new();
        let c = candidate("Acme SA", Some("acme.ch"));
        store.upsert(&c.identity(), insert(&c)).await.unwrap();

        let result = store
            .upsert(
                &c.identity(),
                Box::new(|_| Err(AppError::InternalError("boom".into()))),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(store.all().await[0].status, ProspectStatus::New);
    }

    #[tokio::test]
    async fn test_update_status_only_tail_states() {
        let store = MemoryProspectStore::new();
        let c = candidate("Acme SA", Some("acme.ch"));
        let row = store
            .upsert(
                &c.identity(),
                Box::new(move |_| {
                    let mut p = Prospect::from_candidate(&c);
                    p.status = ProspectStatus::Scored;
                    p.score = 72;
                    Ok(p)
                }),
            )
            .await
            .unwrap();

        let contacted = store.update_status(row.id, ProspectStatus::Contacted).await.unwrap();
        assert_eq!(contacted.status, ProspectStatus::Contacted);
        assert_eq!(contacted.score, 72);

        let err = store.update_status(row.id, ProspectStatus::Enriched).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidTransition(_)));

        let err = store.update_status(Uuid::new_v4(), ProspectStatus::Contacted).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_candidate_failures_accumulate() {
        let store = MemoryProspectStore::new();
        let identity = candidate("Acme SA", None).identity();
        store.record_candidate_failure(&identity, "store_error", "down").await.unwrap();
        let record = store.record_candidate_failure(&identity, "store_error", "down").await.unwrap();
        assert_eq!(record.consecutive_failures, 2);
        assert_eq!(store.load_ledger(&identity).await.unwrap().pipeline.attempts, 2);
    }
}
