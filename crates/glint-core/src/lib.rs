//! Canonical listing model and identity hashing for GLINT.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const CRATE_NAME: &str = "glint-core";

/// Normalizer output: a validated listing that has not been persisted yet.
///
/// `canonical_hash` is fixed at this point; everything downstream keys on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingDraft {
    pub canonical_hash: String,
    pub source: String,
    pub title: String,
    pub company: String,
    pub url: String,
    pub location: Option<String>,
    pub description: String,
    pub requirement_text: Option<String>,
    pub employment_type: Option<String>,
    pub posted_date: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// Persisted listing row. Created once per canonical hash; later sightings
/// only touch `last_seen` and the activity flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobListing {
    pub canonical_hash: String,
    pub source: String,
    pub title: String,
    pub company: String,
    pub url: String,
    pub location: Option<String>,
    pub description: String,
    pub requirement_text: Option<String>,
    pub employment_type: Option<String>,
    pub posted_date: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
    pub applied: bool,
    pub notified: bool,
    pub rejected: bool,
    pub annotations: Option<String>,
}

/// One scoring outcome for a (listing, profile version) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub listing_hash: String,
    pub score: i64,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub key_points: Vec<String>,
    pub backend: String,
    pub profile_version: String,
    pub scored_at: DateTime<Utc>,
}

/// Name used in `ScoreRecord::backend` when the deterministic rule scorer
/// produced the result.
pub const FALLBACK_BACKEND: &str = "fallback";

/// Content hash of the user profile at a point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileVersion {
    pub hash: String,
    pub recorded_at: DateTime<Utc>,
}

/// User decision to exclude a listing. Visibility metadata only; never feeds
/// back into dedup or scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectionRecord {
    pub listing_hash: String,
    pub category: String,
    pub note: String,
    pub rejected_at: DateTime<Utc>,
}

/// Collapse runs of whitespace to single spaces and trim the ends.
pub fn collapse_ws(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn suffix_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\s+(pty\.?\s+ltd\.?|pty\s+limited|pty|ltd\.?|limited|inc\.?|incorporated|corp\.?|corporation|llc|llp|plc|gmbh)$",
        )
        .expect("static suffix pattern compiles")
    })
}

/// Lowercase a company name and strip trailing legal suffixes so that
/// "Acme Pty Ltd" and "ACME" hash identically.
pub fn normalize_company(company: &str) -> String {
    let mut normalized = collapse_ws(company).to_lowercase();
    loop {
        let stripped = suffix_pattern().replace(&normalized, "").to_string();
        if stripped == normalized {
            break;
        }
        normalized = stripped;
    }
    collapse_ws(&normalized)
}

/// Stable identity hash over (title, company, url).
///
/// Whitespace and case variation collapse; the URL stays in the hash so two
/// different roles at one company with the same title keep distinct rows.
pub fn canonical_hash(title: &str, company: &str, url: &str) -> String {
    let content = format!(
        "{}|{}|{}",
        collapse_ws(title).to_lowercase(),
        normalize_company(company),
        url.trim().to_lowercase(),
    );
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content hash of a profile document, used as the profile version id.
pub fn profile_hash(profile_text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(profile_text.as_bytes());
    hex::encode(hasher.finalize())
}

impl ListingDraft {
    /// Promote a draft to a listing row with both sighting timestamps set to
    /// the draft's fetch time.
    pub fn into_listing(self) -> JobListing {
        JobListing {
            canonical_hash: self.canonical_hash,
            source: self.source,
            title: self.title,
            company: self.company,
            url: self.url,
            location: self.location,
            description: self.description,
            requirement_text: self.requirement_text,
            employment_type: self.employment_type,
            posted_date: self.posted_date,
            first_seen: self.fetched_at,
            last_seen: self.fetched_at,
            active: true,
            applied: false,
            notified: false,
            rejected: false,
            annotations: None,
        }
    }
}

impl ScoreRecord {
    pub fn is_fallback(&self) -> bool {
        self.backend == FALLBACK_BACKEND
    }
}
