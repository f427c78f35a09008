//! Scheduler Loop: one candidate at a time, a fixed delay between cycles,
//! discovery refills when the queue runs dry.
//!
//! ```text
//! idle -> dequeue -> orchestrate -> merge -> score -> persist -> sleep -> idle
//!   └─ queue empty -> discover (backoff while nothing new turns up)
//! ```
use moka::future::Cache;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::config::Config;
use crate::errors::SourceError;
use crate::models::{Candidate, Locale};
use crate::pipeline::{CandidateReport, Pipeline};
use crate::sources::DiscoverySource;

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Delay between the end of one cycle and the next dequeue.
    pub interval: Duration,
    pub max_candidate_attempts: u32,
    pub discovery_backoff_base: Duration,
    pub discovery_backoff_max: Duration,
    pub discovery_limit: usize,
    /// Discovery queries, used in rotation.
    pub targets: Vec<String>,
    pub locale: Locale,
}

impl SchedulerSettings {
    pub fn from_config(config: &Config) -> Self {
        let targeting = &config.targeting;
        let policy = &config.policy;
        let targets = if targeting.targets.is_empty() {
            vec![targeting.sector.clone()]
        } else {
            targeting.targets.clone()
        };
        Self {
            interval: policy.processing_interval,
            max_candidate_attempts: policy.max_candidate_attempts,
            discovery_backoff_base: policy.discovery_backoff_base,
            discovery_backoff_max: policy.discovery_backoff_max,
            discovery_limit: targeting.discovery_limit,
            targets,
            locale: Locale::new(targeting.city.clone(), targeting.country.clone()),
        }
    }

    /// Delay after `empty_refills` consecutive refills that brought nothing new.
    pub fn discovery_backoff(&self, empty_refills: u32) -> Duration {
        let exponent = empty_refills.saturating_sub(1).min(16);
        self.discovery_backoff_base
            .saturating_mul(1u32 << exponent)
            .min(self.discovery_backoff_max)
    }
}

#[derive(Debug, Clone)]
pub struct QueuedCandidate {
    pub candidate: Candidate,
    /// Failed cycles so far.
    pub attempts: u32,
}

/// What one loop iteration did.
#[derive(Debug)]
pub enum TickOutcome {
    Processed(CandidateReport),
    Failed {
        identity: String,
        kind: &'static str,
        requeued: bool,
    },
    /// Nothing to process: discovery found no new candidate or failed.
    Idle { discovery_error: Option<SourceError> },
}

pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    discovery: Arc<dyn DiscoverySource>,
    settings: SchedulerSettings,
    queue: VecDeque<QueuedCandidate>,
    /// Identity keys already stored or abandoned; spares a store lookup at refill.
    known: Cache<String, ()>,
    target_cursor: usize,
    empty_refills: u32,
    processed: u64,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<Pipeline>,
        discovery: Arc<dyn DiscoverySource>,
        settings: SchedulerSettings,
    ) -> Self {
        let known = Cache::builder()
            .time_to_live(Duration::from_secs(6 * 3600))
            .max_capacity(50_000)
            .build();
        Self {
            pipeline,
            discovery,
            settings,
            queue: VecDeque::new(),
            known,
            target_cursor: 0,
            empty_refills: 0,
            processed: 0,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    /// Queue candidates directly, ahead of any discovery.
    pub fn enqueue(&mut self, candidates: impl IntoIterator<Item = Candidate>) {
        self.queue.extend(
            candidates
                .into_iter()
                .map(|candidate| QueuedCandidate { candidate, attempts: 0 }),
        );
    }

    fn next_target(&mut self) -> String {
        let target = self.settings.targets[self.target_cursor % self.settings.targets.len()].clone();
        self.target_cursor = self.target_cursor.wrapping_add(1);
        target
    }

    /// Fetch a discovery batch and queue the candidates not already known.
    pub async fn refill(&mut self) -> Result<usize, SourceError> {
        if self.settings.targets.is_empty() {
            return Ok(0);
        }
        let target = self.next_target();
        tracing::info!("📭 Queue empty, discovering '{}' in {}", target, self.settings.locale);

        let found = self
            .discovery
            .search(&target, &self.settings.locale, self.settings.discovery_limit)
            .await?;

        let store = Arc::clone(self.pipeline.store());
        let mut added = 0;
        for candidate in found {
            let identity = candidate.identity();
            let key = identity.key();
            if self.known.contains_key(&key) {
                continue;
            }
            if self
                .queue
                .iter()
                .any(|q| q.candidate.identity().matches(&identity))
            {
                continue;
            }

            match store
                .exists_by_identity(&candidate.company_name, candidate.website.as_deref())
                .await
            {
                Ok(true) => {
                    self.known.insert(key, ()).await;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!("Skipping {}: existence check failed: {}", identity, e);
                    continue;
                }
            }

            let attempts = match store.load_ledger(&identity).await {
                Ok(ledger) => ledger.pipeline.consecutive_failures,
                Err(e) => {
                    tracing::warn!("Skipping {}: attempt ledger unavailable: {}", identity, e);
                    continue;
                }
            };
            if attempts >= self.settings.max_candidate_attempts {
                tracing::debug!("Skipping abandoned candidate {}", identity);
                self.known.insert(key, ()).await;
                continue;
            }

            self.queue.push_back(QueuedCandidate { candidate, attempts });
            added += 1;
        }

        tracing::info!("✅ {} new candidates queued", added);
        Ok(added)
    }

    /// One loop iteration: refill if needed, then process the head of the queue.
    ///
    /// Never fails: every error is logged and reflected in the outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        if self.queue.is_empty() {
            match self.refill().await {
                Ok(0) => {
                    self.empty_refills += 1;
                    return TickOutcome::Idle { discovery_error: None };
                }
                Ok(_) => self.empty_refills = 0,
                Err(e) => {
                    self.empty_refills += 1;
                    tracing::error!("❌ Discovery failed ({}): {}", e.error_kind(), e);
                    return TickOutcome::Idle {
                        discovery_error: Some(e),
                    };
                }
            }
        }

        let Some(mut queued) = self.queue.pop_front() else {
            return TickOutcome::Idle { discovery_error: None };
        };
        let identity = queued.candidate.identity();
        let store = Arc::clone(self.pipeline.store());

        match self.pipeline.process(&queued.candidate).await {
            Ok(report) => {
                self.processed += 1;
                self.known.insert(identity.key(), ()).await;
                match store.stats().await {
                    Ok(stats) => tracing::info!(
                        "📊 Stats - Total: {} | With email: {} | Scored: {} | Insufficient data: {}",
                        stats.total,
                        stats.with_email,
                        stats.scored,
                        stats.insufficient_data
                    ),
                    Err(e) => tracing::warn!("Stats unavailable: {}", e),
                }
                TickOutcome::Processed(report)
            }
            Err(e) => {
                let kind = e.error_kind();
                tracing::error!(
                    "❌ Candidate {} ({}) failed ({}): {}",
                    queued.candidate.company_name,
                    identity,
                    kind,
                    e
                );
                queued.attempts = match store
                    .record_candidate_failure(&identity, kind, &e.to_string())
                    .await
                {
                    Ok(record) => record.consecutive_failures,
                    Err(store_err) => {
                        tracing::warn!("Failed to record failure for {}: {}", identity, store_err);
                        queued.attempts + 1
                    }
                };

                let requeued = queued.attempts < self.settings.max_candidate_attempts;
                if requeued {
                    self.queue.push_back(queued);
                } else {
                    tracing::warn!(
                        "Abandoning {} after {} failed attempts",
                        identity,
                        queued.attempts
                    );
                    self.known.insert(identity.key(), ()).await;
                }
                TickOutcome::Failed {
                    identity: identity.key(),
                    kind,
                    requeued,
                }
            }
        }
    }

    /// Sleep that follows `outcome`.
    pub fn delay_after(&self, outcome: &TickOutcome) -> Duration {
        match outcome {
            TickOutcome::Idle { .. } => self.settings.discovery_backoff(self.empty_refills),
            _ => self.settings.interval,
        }
    }

    /// Loop until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The signal is only observed between cycles; a cycle in progress always
    /// runs to its commit.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            "🚀 Scheduler started: interval {}s, targets {:?} in {}",
            self.settings.interval.as_secs(),
            self.settings.targets,
            self.settings.locale
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let outcome = self.tick().await;
            let delay = self.delay_after(&outcome);
            if matches!(outcome, TickOutcome::Idle { .. }) {
                tracing::warn!("⚠️ No new candidates, next discovery in {}s", delay.as_secs());
            } else {
                tracing::info!("⏳ Waiting {}s before the next candidate", delay.as_secs());
            }

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!("⏹️ Scheduler stopped after {} candidates", self.processed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> SchedulerSettings {
        SchedulerSettings {
            interval: Duration::from_secs(120),
            max_candidate_attempts: 3,
            discovery_backoff_base: Duration::from_secs(60),
            discovery_backoff_max: Duration::from_secs(1800),
            discovery_limit: 10,
            targets: vec!["restaurants".into()],
            locale: Locale::new("Genève", "Suisse"),
        }
    }

    #[test]
    fn test_discovery_backoff_grows_and_caps() {
        let s = settings();
        assert_eq!(s.discovery_backoff(1), Duration::from_secs(60));
        assert_eq!(s.discovery_backoff(2), Duration::from_secs(120));
        assert_eq!(s.discovery_backoff(4), Duration::from_secs(480));
        assert_eq!(s.discovery_backoff(10), Duration::from_secs(1800));
        assert_eq!(s.discovery_backoff(u32::MAX), Duration::from_secs(1800));
    }
}
