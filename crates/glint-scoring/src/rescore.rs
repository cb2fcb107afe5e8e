//! Profile-change detection and borderline-band rescoring.
//!
//! Runs as a single non-concurrent pass: one profile change, one batch.
//! Listings far outside the band are left alone; a profile edit is unlikely
//! to move them across any actionable threshold.

use std::sync::Arc;

use chrono::{Duration, Utc};
use glint_core::profile_hash;
use glint_storage::{Store, StorageError};
use tracing::{debug, info};

use crate::ScoreChain;

#[derive(Debug, Clone)]
pub struct RescoreConfig {
    pub band_min: i64,
    pub band_max: i64,
    pub max_age: Duration,
    pub notify_threshold: i64,
}

impl Default for RescoreConfig {
    fn default() -> Self {
        Self { band_min: 40, band_max: 85, max_age: Duration::days(30), notify_threshold: 80 }
    }
}

pub struct RescoreManager {
    store: Store,
    chain: Arc<ScoreChain>,
    config: RescoreConfig,
}

impl RescoreManager {
    pub fn new(store: Store, chain: Arc<ScoreChain>, config: RescoreConfig) -> Self {
        Self { store, chain, config }
    }

    /// Compare the profile's content hash against the last recorded version
    /// and rescore the borderline band if it moved. Returns the number of
    /// listings rescored.
    pub async fn on_profile_change(&self, profile_text: &str) -> Result<u64, StorageError> {
        let new_hash = profile_hash(profile_text);
        let now = Utc::now();

        match self.store.latest_profile_version().await? {
            Some(previous) if previous.hash == new_hash => {
                debug!("profile unchanged, nothing to rescore");
                return Ok(0);
            }
            Some(previous) => {
                info!(old = %previous.hash, new = %new_hash, "profile change detected");
                self.store.record_profile_version(&new_hash, now).await?;
            }
            None => {
                info!(hash = %new_hash, "first profile version recorded");
                self.store.record_profile_version(&new_hash, now).await?;
                return Ok(0);
            }
        }

        let candidates = self
            .store
            .listings_for_rescore(
                self.config.band_min,
                self.config.band_max,
                self.config.max_age,
                &new_hash,
                now,
            )
            .await?;
        info!(count = candidates.len(), "rescoring borderline listings");

        let mut rescored = 0u64;
        for (listing, old_score) in candidates {
            let record = self.chain.score(&listing, profile_text, &new_hash).await;
            let new_score = record.score;
            self.store.replace_score(&record).await?;
            rescored += 1;
            if old_score < self.config.notify_threshold && new_score >= self.config.notify_threshold
            {
                info!(
                    listing = %listing.canonical_hash,
                    old_score,
                    new_score,
                    "rescore crossed the notify threshold"
                );
            } else {
                debug!(listing = %listing.canonical_hash, old_score, new_score, "rescored");
            }
        }
        Ok(rescored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackoffPolicy;
    use crate::rules::{RuleConfig, RuleScorer};
    use chrono::{DateTime, Utc};
    use glint_core::{canonical_hash, ListingDraft, ScoreRecord};

    fn draft(title: &str, url: &str, fetched_at: DateTime<Utc>) -> ListingDraft {
        ListingDraft {
            canonical_hash: canonical_hash(title, "Acme", url),
            source: "board".into(),
            title: title.into(),
            company: "Acme".into(),
            url: url.into(),
            location: None,
            description: "python and machine learning work".into(),
            requirement_text: Some("python, machine learning".into()),
            employment_type: None,
            posted_date: None,
            fetched_at,
        }
    }

    fn seed_score(hash: &str, score: i64, version: &str) -> ScoreRecord {
        ScoreRecord {
            listing_hash: hash.into(),
            score,
            matched: vec![],
            unmatched: vec![],
            key_points: vec![],
            backend: "primary".into(),
            profile_version: version.into(),
            scored_at: Utc::now(),
        }
    }

    async fn manager() -> (RescoreManager, Store) {
        let store = Store::in_memory().await.unwrap();
        store.ensure_schema().await.unwrap();
        let chain = Arc::new(ScoreChain::new(
            Vec::new(),
            1,
            BackoffPolicy::default(),
            RuleScorer::new(&RuleConfig::default()).unwrap(),
        ));
        let manager = RescoreManager::new(store.clone(), chain, RescoreConfig::default());
        (manager, store)
    }

    #[tokio::test]
    async fn first_run_records_version_without_rescoring() {
        let (manager, store) = manager().await;
        assert_eq!(manager.on_profile_change("python, sql").await.unwrap(), 0);
        assert!(store.latest_profile_version().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unchanged_profile_is_a_noop() {
        let (manager, store) = manager().await;
        manager.on_profile_change("python, sql").await.unwrap();
        assert_eq!(manager.on_profile_change("python, sql").await.unwrap(), 0);
        // still exactly one recorded version
        let latest = store.latest_profile_version().await.unwrap().unwrap();
        assert_eq!(latest.hash, profile_hash("python, sql"));
    }

    #[tokio::test]
    async fn only_borderline_recent_listings_are_rescored() {
        let (manager, store) = manager().await;
        let now = Utc::now();

        // establish a baseline profile version
        manager.on_profile_change("python").await.unwrap();
        let old_version = profile_hash("python");

        let borderline = draft("Graduate AI Engineer", "https://x/1", now - Duration::days(5));
        let high = draft("Graduate Data Engineer", "https://x/2", now - Duration::days(5));
        for d in [&borderline, &high] {
            store.upsert_listing(d).await.unwrap();
        }
        store
            .replace_score(&seed_score(&borderline.canonical_hash, 72, &old_version))
            .await
            .unwrap();
        store.replace_score(&seed_score(&high.canonical_hash, 95, &old_version)).await.unwrap();

        let rescored = manager
            .on_profile_change("python, machine learning")
            .await
            .unwrap();
        assert_eq!(rescored, 1);

        let new_version = profile_hash("python, machine learning");
        let updated = store.current_score(&borderline.canonical_hash).await.unwrap().unwrap();
        assert_eq!(updated.profile_version, new_version);
        assert_eq!(updated.backend, glint_core::FALLBACK_BACKEND);

        // the high scorer kept its original record untouched
        let untouched = store.current_score(&high.canonical_hash).await.unwrap().unwrap();
        assert_eq!(untouched.score, 95);
        assert_eq!(untouched.profile_version, old_version);
    }
}
