//! Scoring orchestration: an ordered backend chain with retry/backoff and a
//! deterministic rule-based fallback that always produces a result.

pub mod backend;
pub mod parse;
pub mod rescore;
pub mod rules;

use std::sync::Arc;

use chrono::Utc;
use glint_core::{JobListing, ScoreRecord, FALLBACK_BACKEND};
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

use backend::{BackendError, BackoffPolicy, ScoreBackend};
use parse::{parse_response, ScoreOutcome};
use rules::RuleScorer;

pub const CRATE_NAME: &str = "glint-scoring";

/// What the chain sends to a backend: listing fields plus the profile text.
#[derive(Debug, Clone)]
pub struct ScoreRequest {
    pub profile_text: String,
    pub listing_title: String,
    pub listing_description: String,
    pub listing_requirements: String,
}

impl ScoreRequest {
    pub fn for_listing(listing: &JobListing, profile_text: &str) -> Self {
        Self {
            profile_text: profile_text.to_string(),
            listing_title: listing.title.clone(),
            listing_description: listing.description.clone(),
            listing_requirements: listing.requirement_text.clone().unwrap_or_default(),
        }
    }
}

/// Resolution of one backend attempt. The chain loop pattern-matches on this
/// rather than routing control flow through errors.
#[derive(Debug)]
enum ChainEvent {
    Scored(ScoreOutcome),
    RetrySame,
    Advance(String),
}

/// Ordered scoring chain. Every listing that enters `score` leaves with a
/// `ScoreRecord`; there is no failure path once the chain is constructed.
pub struct ScoreChain {
    backends: Vec<Arc<dyn ScoreBackend>>,
    limits: Vec<Arc<Semaphore>>,
    backoff: BackoffPolicy,
    fallback: RuleScorer,
}

impl ScoreChain {
    pub fn new(
        backends: Vec<Arc<dyn ScoreBackend>>,
        per_backend_inflight: usize,
        backoff: BackoffPolicy,
        fallback: RuleScorer,
    ) -> Self {
        let limits = backends
            .iter()
            .map(|_| Arc::new(Semaphore::new(per_backend_inflight.max(1))))
            .collect();
        Self { backends, limits, backoff, fallback }
    }

    /// Score one listing against one profile version.
    ///
    /// Attempts per backend are bounded by `1 + backoff.max_retries`; when the
    /// chain is exhausted the rule scorer runs, so this always returns.
    pub async fn score(
        &self,
        listing: &JobListing,
        profile_text: &str,
        profile_version: &str,
    ) -> ScoreRecord {
        let request = ScoreRequest::for_listing(listing, profile_text);

        for (backend, limit) in self.backends.iter().zip(&self.limits) {
            let mut retries = 0usize;
            loop {
                let span = info_span!(
                    "score_attempt",
                    listing = %listing.canonical_hash,
                    backend = backend.name(),
                    retries,
                );
                let event = self.attempt(backend.as_ref(), limit, &request).instrument(span).await;
                match event {
                    ChainEvent::Scored(outcome) => {
                        return finish(listing, outcome, backend.name(), profile_version);
                    }
                    ChainEvent::RetrySame if retries < self.backoff.max_retries => {
                        let delay = self.backoff.delay_for_attempt(retries);
                        retries += 1;
                        debug!(backend = backend.name(), ?delay, "rate limited, backing off");
                        tokio::time::sleep(delay).await;
                    }
                    ChainEvent::RetrySame => {
                        warn!(backend = backend.name(), "rate limit budget exhausted, advancing");
                        break;
                    }
                    ChainEvent::Advance(reason) => {
                        warn!(backend = backend.name(), %reason, "advancing chain");
                        break;
                    }
                }
            }
        }

        let outcome = self.fallback.score(&request);
        finish(listing, outcome, FALLBACK_BACKEND, profile_version)
    }

    /// One attempt against one backend. The in-flight permit is released
    /// before any backoff sleep, so a stalled backend never blocks the pool.
    async fn attempt(
        &self,
        backend: &dyn ScoreBackend,
        limit: &Semaphore,
        request: &ScoreRequest,
    ) -> ChainEvent {
        let _permit = limit.acquire().await.expect("semaphore not closed");
        match backend.evaluate(request).await {
            Ok(body) => match parse_response(&body) {
                Ok(outcome) => ChainEvent::Scored(outcome),
                Err(_) => ChainEvent::Advance("malformed response".into()),
            },
            Err(BackendError::RateLimited) => ChainEvent::RetrySame,
            Err(BackendError::Unavailable(reason)) => ChainEvent::Advance(reason),
        }
    }
}

fn finish(
    listing: &JobListing,
    outcome: ScoreOutcome,
    backend: &str,
    profile_version: &str,
) -> ScoreRecord {
    ScoreRecord {
        listing_hash: listing.canonical_hash.clone(),
        score: parse::clamp_score(outcome.score),
        matched: outcome.matched,
        unmatched: outcome.unmatched,
        key_points: outcome.key_points,
        backend: backend.to_string(),
        profile_version: profile_version.to_string(),
        scored_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone)]
    enum Step {
        Respond(&'static str),
        RateLimit,
        Down,
    }

    struct ScriptedBackend {
        name: String,
        script: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                name: name.into(),
                script: Mutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoreBackend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        async fn evaluate(&self, _request: &ScoreRequest) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Down);
            match step {
                Step::Respond(body) => Ok(body.to_string()),
                Step::RateLimit => Err(BackendError::RateLimited),
                Step::Down => Err(BackendError::Unavailable("scripted outage".into())),
            }
        }
    }

    fn fast_backoff() -> BackoffPolicy {
        BackoffPolicy {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        }
    }

    fn chain(backends: Vec<Arc<ScriptedBackend>>) -> ScoreChain {
        let backends: Vec<Arc<dyn ScoreBackend>> =
            backends.into_iter().map(|b| b as Arc<dyn ScoreBackend>).collect();
        ScoreChain::new(
            backends,
            4,
            fast_backoff(),
            RuleScorer::new(&rules::RuleConfig::default()).unwrap(),
        )
    }

    fn listing(title: &str, description: &str) -> JobListing {
        let now = Utc::now();
        JobListing {
            canonical_hash: glint_core::canonical_hash(title, "Acme", "https://x/1"),
            source: "board".into(),
            title: title.into(),
            company: "Acme".into(),
            url: "https://x/1".into(),
            location: None,
            description: description.into(),
            requirement_text: None,
            employment_type: None,
            posted_date: None,
            first_seen: now,
            last_seen: now,
            active: true,
            applied: false,
            notified: false,
            rejected: false,
            annotations: None,
        }
    }

    const GOOD_BODY: &str =
        r#"{"score": 77, "matched": ["python"], "unmatched": [], "key_points": ["fit"]}"#;

    #[tokio::test]
    async fn first_successful_backend_short_circuits_the_chain() {
        let a = ScriptedBackend::new("backend-a", vec![Step::Respond(GOOD_BODY)]);
        let b = ScriptedBackend::new("backend-b", vec![Step::Respond(GOOD_BODY)]);
        let record = chain(vec![a.clone(), b.clone()])
            .score(&listing("Graduate AI Engineer", "python"), "python", "v1")
            .await;
        assert_eq!(record.backend, "backend-a");
        assert_eq!(record.score, 77);
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 0);
    }

    #[tokio::test]
    async fn all_backends_down_lands_on_fallback_with_bounded_attempts() {
        let a = ScriptedBackend::new("backend-a", vec![]);
        let b = ScriptedBackend::new("backend-b", vec![]);
        let record = chain(vec![a.clone(), b.clone()])
            .score(
                &listing("Graduate AI Engineer", "python and machine learning work"),
                "python, machine learning",
                "v1",
            )
            .await;
        assert_eq!(record.backend, FALLBACK_BACKEND);
        assert!(record.score >= 0 && record.score <= 100);
        // unavailable backends are not retried
        assert_eq!(a.calls(), 1);
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn rate_limit_retries_same_backend_then_advances() {
        let a = ScriptedBackend::new(
            "backend-a",
            vec![Step::RateLimit, Step::RateLimit, Step::RateLimit],
        );
        let b = ScriptedBackend::new("backend-b", vec![Step::Respond(GOOD_BODY)]);
        let record = chain(vec![a.clone(), b.clone()])
            .score(&listing("Graduate AI Engineer", "python"), "python", "v1")
            .await;
        // initial attempt + max_retries, then chain advance
        assert_eq!(a.calls(), 3);
        assert_eq!(record.backend, "backend-b");
    }

    #[tokio::test]
    async fn rate_limit_then_success_stays_on_same_backend() {
        let a = ScriptedBackend::new("backend-a", vec![Step::RateLimit, Step::Respond(GOOD_BODY)]);
        let record = chain(vec![a.clone()])
            .score(&listing("Graduate AI Engineer", "python"), "python", "v1")
            .await;
        assert_eq!(a.calls(), 2);
        assert_eq!(record.backend, "backend-a");
    }

    #[tokio::test]
    async fn malformed_response_advances_without_retry() {
        let a = ScriptedBackend::new("backend-a", vec![Step::Respond("cannot assess this")]);
        let b = ScriptedBackend::new("backend-b", vec![Step::Respond(GOOD_BODY)]);
        let record = chain(vec![a.clone(), b.clone()])
            .score(&listing("Graduate AI Engineer", "python"), "python", "v1")
            .await;
        assert_eq!(a.calls(), 1);
        assert_eq!(record.backend, "backend-b");
    }

    #[tokio::test]
    async fn empty_chain_degrades_to_rule_scoring() {
        let record = chain(vec![])
            .score(
                &listing("Graduate AI Engineer", "python and sql work"),
                "python, sql",
                "v1",
            )
            .await;
        assert_eq!(record.backend, FALLBACK_BACKEND);
        assert_eq!(record.score, 100);
    }

    #[tokio::test]
    async fn hard_gate_fires_through_fallback_even_with_keyword_overlap() {
        let a = ScriptedBackend::new("backend-a", vec![]);
        let b = ScriptedBackend::new("backend-b", vec![]);
        let record = chain(vec![a, b])
            .score(
                &listing(
                    "Graduate AI Engineer",
                    "python machine learning role, no sponsorship offered",
                ),
                "python, machine learning",
                "v1",
            )
            .await;
        assert_eq!(record.score, 0);
        assert_eq!(record.backend, FALLBACK_BACKEND);
        assert!(record.key_points[0].contains("sponsorship"));
    }

    #[tokio::test]
    async fn backend_scores_outside_range_are_clamped() {
        let a = ScriptedBackend::new("backend-a", vec![Step::Respond(r#"{"score": 180}"#)]);
        let record = chain(vec![a])
            .score(&listing("Graduate AI Engineer", "python"), "python", "v1")
            .await;
        assert_eq!(record.score, 100);
    }
}
