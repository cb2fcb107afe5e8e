//! Tiered intake pipeline: normalize, filter, dedup, persist, score.
//!
//! Gates run in fixed order per listing (title, duplicate, quality) and
//! short-circuit; later gates are the expensive ones. Across listings the
//! pipeline is a bounded worker pool with no ordering guarantees.

pub mod config;
pub mod filters;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use glint_adapters::{normalize, SourcePayload, SourceSpec};
use glint_core::{collapse_ws, profile_hash, JobListing};
use glint_scoring::ScoreChain;
use glint_storage::{SightingOutcome, StorageError, Store};
use serde::Serialize;
use strsim::jaro_winkler;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use config::{ConfigError, PipelineConfig};
use filters::{GateOutcome, QualityGate, TitleGate};

pub const CRATE_NAME: &str = "glint-pipeline";

/// Which gate turned a listing away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FilterStage {
    Title,
    Quality,
}

#[derive(Debug, Clone, Serialize)]
pub struct RejectedListing {
    pub title: String,
    pub stage: FilterStage,
    pub reason: String,
}

/// Advisory flag: two listings that look like the same posting across
/// sources. Reported, never acted on.
#[derive(Debug, Clone, Serialize)]
pub struct NearDuplicate {
    pub hash_a: String,
    pub hash_b: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub received: usize,
    pub invalid_payloads: usize,
    pub tier1_rejected: usize,
    pub tier2_duplicates: usize,
    pub tier3_rejected: usize,
    pub inserted: usize,
    pub refreshed: usize,
    pub scored: usize,
    pub fallback_scored: usize,
    pub deactivated: u64,
    pub rejections: Vec<RejectedListing>,
    pub near_duplicates: Vec<NearDuplicate>,
}

pub struct IngestPipeline {
    store: Store,
    chain: Arc<ScoreChain>,
    title_gate: TitleGate,
    quality_gate: QualityGate,
    dedup_window: Duration,
    retention: Duration,
    max_in_flight: usize,
    near_duplicate_threshold: f64,
}

impl IngestPipeline {
    pub fn new(
        config: &PipelineConfig,
        store: Store,
        chain: Arc<ScoreChain>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            chain,
            title_gate: TitleGate::new(&config.title_filter)?,
            quality_gate: QualityGate::new(&config.quality_filter),
            dedup_window: Duration::days(config.dedup_window_days),
            retention: Duration::days(config.retention_days),
            max_in_flight: config.max_in_flight,
            near_duplicate_threshold: config.near_duplicate_threshold,
        })
    }

    /// Process one batch of raw payloads end to end.
    ///
    /// Per-listing failures never stop the run. Cancelling `shutdown` stops
    /// intake and the scoring queue; in-flight scoring attempts complete, and
    /// anything persisted but unscored is picked up by the next run.
    pub async fn run(
        &self,
        batches: &[(SourceSpec, Vec<SourcePayload>)],
        profile_text: &str,
        shutdown: &CancellationToken,
    ) -> Result<IngestSummary, StorageError> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let profile_version = profile_hash(profile_text);
        match self.store.latest_profile_version().await? {
            Some(version) if version.hash == profile_version => {}
            _ => self.store.record_profile_version(&profile_version, started_at).await?,
        }

        let mut received = 0usize;
        let mut invalid_payloads = 0usize;
        let mut tier1_rejected = 0usize;
        let mut tier2_duplicates = 0usize;
        let mut tier3_rejected = 0usize;
        let mut inserted = 0usize;
        let mut refreshed = 0usize;
        let mut rejections = Vec::new();
        let mut to_score: Vec<JobListing> = Vec::new();
        let mut fresh_hashes: Vec<String> = Vec::new();

        'intake: for (source, payloads) in batches {
            for payload in payloads {
                if shutdown.is_cancelled() {
                    warn!(run_id = %run_id, "shutdown requested, stopping intake");
                    break 'intake;
                }
                received += 1;

                let draft = match normalize(payload, source, Utc::now()) {
                    Ok(draft) => draft,
                    Err(error) => {
                        invalid_payloads += 1;
                        warn!(source = %source.id, %error, "dropping invalid payload");
                        continue;
                    }
                };

                if let GateOutcome::Reject(reason) = self.title_gate.evaluate(&draft.title) {
                    tier1_rejected += 1;
                    rejections.push(RejectedListing {
                        title: draft.title,
                        stage: FilterStage::Title,
                        reason,
                    });
                    continue;
                }

                if self
                    .store
                    .touch_duplicate(&draft.canonical_hash, draft.fetched_at, self.dedup_window)
                    .await?
                {
                    tier2_duplicates += 1;
                    continue;
                }

                if let GateOutcome::Reject(reason) = self.quality_gate.evaluate(&draft.description)
                {
                    tier3_rejected += 1;
                    rejections.push(RejectedListing {
                        title: draft.title,
                        stage: FilterStage::Quality,
                        reason,
                    });
                    continue;
                }

                match self.store.upsert_listing(&draft).await? {
                    SightingOutcome::New => inserted += 1,
                    SightingOutcome::Refreshed | SightingOutcome::Duplicate => refreshed += 1,
                }
                fresh_hashes.push(draft.canonical_hash.clone());
                if let Some(listing) = self.store.get_listing(&draft.canonical_hash).await? {
                    to_score.push(listing);
                }
            }
        }

        let near_duplicates = self.near_duplicate_scan(&fresh_hashes, started_at).await?;

        // Resume anything persisted earlier but never scored; a refreshed
        // listing keeps its old score until the scorer replaces it below.
        for listing in self.store.unscored_listings().await? {
            if !to_score.iter().any(|queued| queued.canonical_hash == listing.canonical_hash) {
                to_score.push(listing);
            }
        }

        let (scored, fallback_scored) =
            self.score_queue(to_score, profile_text, &profile_version, shutdown).await;

        let deactivated = self.store.deactivate_stale(self.retention, Utc::now()).await?;

        let summary = IngestSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            received,
            invalid_payloads,
            tier1_rejected,
            tier2_duplicates,
            tier3_rejected,
            inserted,
            refreshed,
            scored,
            fallback_scored,
            deactivated,
            rejections,
            near_duplicates,
        };
        info!(
            run_id = %summary.run_id,
            received = summary.received,
            tier1 = summary.tier1_rejected,
            tier2 = summary.tier2_duplicates,
            tier3 = summary.tier3_rejected,
            inserted = summary.inserted,
            scored = summary.scored,
            "ingest run complete"
        );
        Ok(summary)
    }

    /// Score the queue on a bounded worker pool. Returns (scored, fallback)
    /// counts. Cancellation stops new work only; listings left behind stay
    /// unscored and re-enter through `unscored_listings` next run.
    async fn score_queue(
        &self,
        queue: Vec<JobListing>,
        profile_text: &str,
        profile_version: &str,
        shutdown: &CancellationToken,
    ) -> (usize, usize) {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        let mut join_set = JoinSet::new();

        for listing in queue {
            if shutdown.is_cancelled() {
                warn!("shutdown requested, leaving remaining listings unscored");
                break;
            }
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .expect("semaphore not closed");
            let chain = self.chain.clone();
            let store = self.store.clone();
            let profile = profile_text.to_string();
            let version = profile_version.to_string();
            join_set.spawn(async move {
                let record = chain.score(&listing, &profile, &version).await;
                let used_fallback = record.is_fallback();
                let persisted = store.replace_score(&record).await;
                drop(permit);
                persisted.map(|()| used_fallback)
            });
        }

        let mut scored = 0usize;
        let mut fallback_scored = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(Ok(used_fallback)) => {
                    scored += 1;
                    if used_fallback {
                        fallback_scored += 1;
                    }
                }
                Ok(Err(error)) => warn!(%error, "failed to persist score"),
                Err(error) => warn!(%error, "scoring task failed"),
            }
        }
        (scored, fallback_scored)
    }

    /// Jaro-Winkler scan of this run's listings against recent history.
    /// Purely advisory; canonical-hash identity is never overridden.
    async fn near_duplicate_scan(
        &self,
        fresh_hashes: &[String],
        now: DateTime<Utc>,
    ) -> Result<Vec<NearDuplicate>, StorageError> {
        if fresh_hashes.is_empty() {
            return Ok(Vec::new());
        }
        let recent = self.store.recent_identities(now - self.dedup_window).await?;
        let mut flagged = Vec::new();
        for fresh_hash in fresh_hashes {
            let Some((fresh_title, fresh_company, _)) =
                recent.iter().find(|(_, _, hash)| hash == fresh_hash)
            else {
                continue;
            };
            let fresh_key = identity_key(fresh_title, fresh_company);
            for (title, company, hash) in &recent {
                if hash == fresh_hash {
                    continue;
                }
                // when both sides are from this run, emit the pair only once
                if fresh_hashes.contains(hash) && hash < fresh_hash {
                    continue;
                }
                let confidence = jaro_winkler(&fresh_key, &identity_key(title, company));
                if confidence >= self.near_duplicate_threshold {
                    flagged.push(NearDuplicate {
                        hash_a: fresh_hash.clone(),
                        hash_b: hash.clone(),
                        confidence,
                    });
                }
            }
        }
        Ok(flagged)
    }
}

fn identity_key(title: &str, company: &str) -> String {
    collapse_ws(&format!("{title} {company}")).to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_key_flattens_case_and_whitespace() {
        assert_eq!(
            identity_key("Graduate  AI Engineer", " ACME "),
            "graduate ai engineer acme"
        );
    }
}
