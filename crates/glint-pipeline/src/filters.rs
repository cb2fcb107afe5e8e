//! Tier 1 (title relevance) and Tier 3 (description quality) gates.
//!
//! Both are in-memory checks; Tier 2 lives in the store because it needs the
//! sighting history.

use regex::RegexSet;

use crate::config::{ConfigError, QualityFilterConfig, TitleFilterConfig};

/// Gate decision with the reason a listing was turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    Pass,
    Reject(String),
}

impl GateOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, GateOutcome::Pass)
    }
}

/// Tier 1: exclusion patterns win over any acceptance match; a title matching
/// nothing at all is rejected unless the config opts into fail-open.
#[derive(Debug)]
pub struct TitleGate {
    exclude: RegexSet,
    exclude_patterns: Vec<String>,
    accept_keywords: Vec<String>,
    keyword_pairs: Vec<(String, String)>,
    accept_unmatched: bool,
}

impl TitleGate {
    pub fn new(config: &TitleFilterConfig) -> Result<Self, ConfigError> {
        let patterns: Vec<String> =
            config.exclude_patterns.iter().map(|p| format!("(?i){p}")).collect();
        let exclude = RegexSet::new(&patterns).map_err(|source| ConfigError::BadPattern {
            pattern: config.exclude_patterns.join(", "),
            source,
        })?;
        Ok(Self {
            exclude,
            exclude_patterns: config.exclude_patterns.clone(),
            accept_keywords: config.accept_keywords.iter().map(|k| k.to_lowercase()).collect(),
            keyword_pairs: config
                .keyword_pairs
                .iter()
                .map(|pair| (pair.domain.to_lowercase(), pair.role.to_lowercase()))
                .collect(),
            accept_unmatched: config.accept_unmatched_titles,
        })
    }

    pub fn evaluate(&self, title: &str) -> GateOutcome {
        let title = title.to_lowercase();

        if let Some(index) = self.exclude.matches(&title).iter().next() {
            return GateOutcome::Reject(format!(
                "title matches exclusion pattern {:?}",
                self.exclude_patterns[index]
            ));
        }

        if self.accept_keywords.iter().any(|keyword| title.contains(keyword)) {
            return GateOutcome::Pass;
        }
        if self
            .keyword_pairs
            .iter()
            .any(|(domain, role)| title.contains(domain) && title.contains(role))
        {
            return GateOutcome::Pass;
        }

        if self.accept_unmatched {
            GateOutcome::Pass
        } else {
            GateOutcome::Reject("title matched no acceptance keyword".into())
        }
    }
}

/// Tier 3: length floor plus one hit from each vocabulary. The failing check
/// is named in the reason.
#[derive(Debug)]
pub struct QualityGate {
    min_chars: usize,
    technical: Vec<String>,
    strong: Vec<String>,
}

impl QualityGate {
    pub fn new(config: &QualityFilterConfig) -> Self {
        Self {
            min_chars: config.min_description_chars,
            technical: config.technical_vocabulary.iter().map(|k| k.to_lowercase()).collect(),
            strong: config.strong_vocabulary.iter().map(|k| k.to_lowercase()).collect(),
        }
    }

    pub fn evaluate(&self, description: &str) -> GateOutcome {
        let length = description.chars().count();
        if length < self.min_chars {
            return GateOutcome::Reject(format!(
                "description too short ({length} < {} chars)",
                self.min_chars
            ));
        }
        let description = description.to_lowercase();
        if !self.technical.iter().any(|keyword| description.contains(keyword)) {
            return GateOutcome::Reject("no technical vocabulary hit".into());
        }
        if !self.strong.iter().any(|keyword| description.contains(keyword)) {
            return GateOutcome::Reject("no strong-signal vocabulary hit".into());
        }
        GateOutcome::Pass
    }
}
