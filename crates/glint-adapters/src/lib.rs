//! Source payload shapes and the normalizer that maps them onto the
//! canonical listing model.
//!
//! Scrapers hand over loosely-structured records; every known source family
//! gets a variant here, and nothing past `normalize` ever sees a raw payload.

use chrono::{DateTime, Utc};
use glint_core::{canonical_hash, collapse_ws, ListingDraft};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "glint-adapters";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Per-source settings the normalizer needs. `base_url` anchors relative
/// listing URLs that card scrapers tend to emit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub id: String,
    pub base_url: String,
}

/// Tagged union of the raw record shapes the known source families produce.
/// Unknown extra fields are ignored on deserialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourcePayload {
    BoardApi(BoardApiRecord),
    ScrapedCard(ScrapedCardRecord),
    Manual(ManualRecord),
}

/// Record from a job-board JSON API. Companies arrive as a nested object and
/// some boards use `listing_url` instead of `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardApiRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: CompanyRef,
    #[serde(default, alias = "listing_url")]
    pub url: String,
    #[serde(default)]
    pub location: Option<LocationRef>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, alias = "requirements")]
    pub requirement_text: Option<String>,
    #[serde(default)]
    pub employment_type: Option<String>,
    #[serde(default)]
    pub posted_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CompanyRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocationRef {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
}

impl LocationRef {
    fn display(&self) -> Option<String> {
        match (&self.city, &self.region) {
            (Some(city), Some(region)) => Some(format!("{city}, {region}")),
            (Some(city), None) => Some(city.clone()),
            (None, Some(region)) => Some(region.clone()),
            (None, None) => None,
        }
    }
}

/// Fields lifted off a rendered search-result card. URLs are frequently
/// relative (`/job/123`), descriptions come from the expanded detail pane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedCardRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default, alias = "href")]
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default, alias = "snippet")]
    pub description: Option<String>,
    #[serde(default)]
    pub requirement_text: Option<String>,
    #[serde(default, alias = "work_type")]
    pub employment_type: Option<String>,
    #[serde(default, alias = "posted")]
    pub posted_date: Option<String>,
}

/// Hand-entered listing: flat, everything optional but the required trio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManualRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub requirement_text: Option<String>,
}

/// Resolve a possibly-relative listing URL against the source base.
/// Absolute URLs pass through untouched apart from trimming.
pub fn resolve_url(base_url: &str, url: &str) -> String {
    let url = url.trim();
    if url.starts_with("http://") || url.starts_with("https://") {
        return url.to_string();
    }
    format!("{}/{}", base_url.trim_end_matches('/'), url.trim_start_matches('/'))
}

fn required(value: &str, field: &'static str) -> Result<String, ValidationError> {
    let collapsed = collapse_ws(value);
    if collapsed.is_empty() {
        return Err(ValidationError::MissingField { field });
    }
    Ok(collapsed)
}

fn optional(value: Option<&str>) -> Option<String> {
    value.map(collapse_ws).filter(|v| !v.is_empty())
}

/// Convert one raw payload into a canonical draft.
///
/// Pure transformation: no persistence, no network. Display fields keep their
/// original casing; case-folding happens only inside the hash.
pub fn normalize(
    payload: &SourcePayload,
    source: &SourceSpec,
    fetched_at: DateTime<Utc>,
) -> Result<ListingDraft, ValidationError> {
    let (title, company, url, location, description, requirement_text, employment_type, posted_date) =
        match payload {
            SourcePayload::BoardApi(record) => (
                required(&record.title, "title")?,
                required(&record.company.name, "company")?,
                required(&record.url, "url")?,
                record.location.as_ref().and_then(LocationRef::display),
                optional(record.description.as_deref()),
                optional(record.requirement_text.as_deref()),
                optional(record.employment_type.as_deref()),
                optional(record.posted_date.as_deref()),
            ),
            SourcePayload::ScrapedCard(record) => (
                required(&record.title, "title")?,
                required(&record.company, "company")?,
                required(&record.url, "url")?,
                optional(record.location.as_deref()),
                optional(record.description.as_deref()),
                optional(record.requirement_text.as_deref()),
                optional(record.employment_type.as_deref()),
                optional(record.posted_date.as_deref()),
            ),
            SourcePayload::Manual(record) => (
                required(&record.title, "title")?,
                required(&record.company, "company")?,
                required(&record.url, "url")?,
                optional(record.location.as_deref()),
                optional(record.description.as_deref()),
                optional(record.requirement_text.as_deref()),
                None,
                None,
            ),
        };

    let url = resolve_url(&source.base_url, &url);
    Ok(ListingDraft {
        canonical_hash: canonical_hash(&title, &company, &url),
        source: source.id.clone(),
        title,
        company,
        url,
        location,
        description: description.unwrap_or_default(),
        requirement_text,
        employment_type,
        posted_date,
        fetched_at,
    })
}
