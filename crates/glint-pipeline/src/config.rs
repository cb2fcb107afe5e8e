//! YAML pipeline configuration, validated once at startup.
//!
//! Invalid configuration is the only error class allowed to be fatal, and it
//! must surface here, never at per-listing runtime.

use std::time::Duration as StdDuration;

use glint_adapters::SourceSpec;
use glint_scoring::backend::{BackoffPolicy, HttpBackendConfig};
use glint_scoring::rescore::RescoreConfig;
use glint_scoring::rules::RuleConfig;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid range for {field}: {detail}")]
    InvalidRange { field: &'static str, detail: String },
    #[error("{field} must not be empty")]
    Empty { field: &'static str },
    #[error("bad regex pattern {pattern:?}: {source}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("backend {name:?}: api key environment variable {var} is not set")]
    MissingApiKey { name: String, var: String },
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    pub title_filter: TitleFilterConfig,
    pub quality_filter: QualityFilterConfig,
    #[serde(default = "default_dedup_window_days")]
    pub dedup_window_days: i64,
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_per_backend_inflight")]
    pub per_backend_inflight: usize,
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
    #[serde(default)]
    pub backoff: BackoffEntry,
    #[serde(default)]
    pub rules: RuleConfig,
    #[serde(default)]
    pub rescore: RescoreEntry,
    #[serde(default = "default_near_duplicate_threshold")]
    pub near_duplicate_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleFilterConfig {
    /// Standalone keywords that pass Tier 1 on their own.
    #[serde(default)]
    pub accept_keywords: Vec<String>,
    /// Domain/role keyword pairs that must co-occur in the title.
    #[serde(default)]
    pub keyword_pairs: Vec<KeywordPair>,
    /// Regex patterns that reject regardless of any acceptance match.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Tier 1 fails closed by default: a title matching nothing is rejected.
    /// Flip this to trade precision for recall.
    #[serde(default)]
    pub accept_unmatched_titles: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KeywordPair {
    pub domain: String,
    pub role: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityFilterConfig {
    #[serde(default = "default_min_description_chars")]
    pub min_description_chars: usize,
    pub technical_vocabulary: Vec<String>,
    pub strong_vocabulary: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendEntry {
    pub name: String,
    pub endpoint: String,
    /// Environment variable holding the API key; resolved at startup.
    pub api_key_env: String,
    pub model: String,
    #[serde(default = "default_backend_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backend_max_tokens")]
    pub max_tokens: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackoffEntry {
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for BackoffEntry {
    fn default() -> Self {
        let policy = BackoffPolicy::default();
        Self {
            max_retries: policy.max_retries,
            base_delay_ms: policy.base_delay.as_millis() as u64,
            max_delay_ms: policy.max_delay.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RescoreEntry {
    pub band_min: i64,
    pub band_max: i64,
    pub max_age_days: i64,
    pub notify_threshold: i64,
}

impl Default for RescoreEntry {
    fn default() -> Self {
        let config = RescoreConfig::default();
        Self {
            band_min: config.band_min,
            band_max: config.band_max,
            max_age_days: config.max_age.num_days(),
            notify_threshold: config.notify_threshold,
        }
    }
}

fn default_dedup_window_days() -> i64 {
    90
}
fn default_retention_days() -> i64 {
    120
}
fn default_max_in_flight() -> usize {
    8
}
fn default_per_backend_inflight() -> usize {
    4
}
fn default_min_description_chars() -> usize {
    200
}
fn default_backend_timeout_secs() -> u64 {
    60
}
fn default_backend_max_tokens() -> u32 {
    2000
}
fn default_near_duplicate_threshold() -> f64 {
    0.9
}

impl PipelineConfig {
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dedup_window_days <= 0 {
            return Err(ConfigError::InvalidRange {
                field: "dedup_window_days",
                detail: format!("{} must be positive", self.dedup_window_days),
            });
        }
        if self.retention_days <= 0 {
            return Err(ConfigError::InvalidRange {
                field: "retention_days",
                detail: format!("{} must be positive", self.retention_days),
            });
        }
        if self.max_in_flight == 0 {
            return Err(ConfigError::InvalidRange {
                field: "max_in_flight",
                detail: "worker pool needs at least one slot".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.near_duplicate_threshold) {
            return Err(ConfigError::InvalidRange {
                field: "near_duplicate_threshold",
                detail: format!("{} outside 0.0..=1.0", self.near_duplicate_threshold),
            });
        }

        let title = &self.title_filter;
        if !title.accept_unmatched_titles
            && title.accept_keywords.is_empty()
            && title.keyword_pairs.is_empty()
        {
            return Err(ConfigError::Empty { field: "title_filter acceptance keywords" });
        }
        for pattern in &title.exclude_patterns {
            if let Err(source) = Regex::new(pattern) {
                return Err(ConfigError::BadPattern { pattern: pattern.clone(), source });
            }
        }

        if self.quality_filter.technical_vocabulary.is_empty() {
            return Err(ConfigError::Empty { field: "quality_filter.technical_vocabulary" });
        }
        if self.quality_filter.strong_vocabulary.is_empty() {
            return Err(ConfigError::Empty { field: "quality_filter.strong_vocabulary" });
        }

        let rescore = &self.rescore;
        if rescore.band_min > rescore.band_max {
            return Err(ConfigError::InvalidRange {
                field: "rescore band",
                detail: format!("{}..{} is inverted", rescore.band_min, rescore.band_max),
            });
        }
        for (field, value) in [
            ("rescore.band_min", rescore.band_min),
            ("rescore.band_max", rescore.band_max),
            ("rescore.notify_threshold", rescore.notify_threshold),
        ] {
            if !(0..=100).contains(&value) {
                return Err(ConfigError::InvalidRange {
                    field,
                    detail: format!("{value} outside 0..=100"),
                });
            }
        }
        if rescore.max_age_days <= 0 {
            return Err(ConfigError::InvalidRange {
                field: "rescore.max_age_days",
                detail: format!("{} must be positive", rescore.max_age_days),
            });
        }

        Ok(())
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.backoff.max_retries,
            base_delay: StdDuration::from_millis(self.backoff.base_delay_ms),
            max_delay: StdDuration::from_millis(self.backoff.max_delay_ms),
        }
    }

    pub fn rescore_config(&self) -> RescoreConfig {
        RescoreConfig {
            band_min: self.rescore.band_min,
            band_max: self.rescore.band_max,
            max_age: chrono::Duration::days(self.rescore.max_age_days),
            notify_threshold: self.rescore.notify_threshold,
        }
    }

    /// Resolve backend entries into HTTP backend configs, pulling API keys
    /// from the environment. A missing key is a startup failure.
    pub fn backend_configs(&self) -> Result<Vec<HttpBackendConfig>, ConfigError> {
        self.backends
            .iter()
            .map(|entry| {
                let api_key = std::env::var(&entry.api_key_env).map_err(|_| {
                    ConfigError::MissingApiKey {
                        name: entry.name.clone(),
                        var: entry.api_key_env.clone(),
                    }
                })?;
                Ok(HttpBackendConfig {
                    name: entry.name.clone(),
                    endpoint: entry.endpoint.clone(),
                    api_key,
                    model: entry.model.clone(),
                    timeout: StdDuration::from_secs(entry.timeout_secs),
                    max_tokens: entry.max_tokens,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_YAML: &str = r#"
title_filter:
  accept_keywords: [graduate, junior, intern]
  keyword_pairs:
    - { domain: machine learning, role: engineer }
    - { domain: ai, role: engineer }
  exclude_patterns:
    - '\b(senior|principal|lead|staff|manager)\b'
quality_filter:
  technical_vocabulary: [python, pytorch, sql]
  strong_vocabulary: [machine learning, deep learning]
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = PipelineConfig::from_yaml_str(MINIMAL_YAML).unwrap();
        assert_eq!(config.dedup_window_days, 90);
        assert_eq!(config.quality_filter.min_description_chars, 200);
        assert!(!config.title_filter.accept_unmatched_titles);
        assert_eq!(config.rescore.band_min, 40);
        assert_eq!(config.rescore.band_max, 85);
        assert!(config.backends.is_empty());
    }

    #[test]
    fn inverted_band_is_rejected_at_startup() {
        let yaml = format!("{MINIMAL_YAML}\nrescore:\n  band_min: 90\n  band_max: 40\n");
        let err = PipelineConfig::from_yaml_str(&yaml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRange { field: "rescore band", .. }));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let yaml = format!("{MINIMAL_YAML}\nrescore:\n  notify_threshold: 180\n");
        assert!(PipelineConfig::from_yaml_str(&yaml).is_err());
    }

    #[test]
    fn empty_vocabulary_is_rejected() {
        let yaml = r#"
title_filter:
  accept_keywords: [graduate]
quality_filter:
  technical_vocabulary: []
  strong_vocabulary: [machine learning]
"#;
        let err = PipelineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::Empty { .. }));
    }

    #[test]
    fn bad_exclusion_regex_is_rejected() {
        let yaml = r#"
title_filter:
  accept_keywords: [graduate]
  exclude_patterns: ['([unclosed']
quality_filter:
  technical_vocabulary: [python]
  strong_vocabulary: [machine learning]
"#;
        let err = PipelineConfig::from_yaml_str(yaml).unwrap_err();
        assert!(matches!(err, ConfigError::BadPattern { .. }));
    }

    #[test]
    fn no_acceptance_keywords_requires_explicit_fail_open() {
        let closed = r#"
title_filter: {}
quality_filter:
  technical_vocabulary: [python]
  strong_vocabulary: [machine learning]
"#;
        assert!(PipelineConfig::from_yaml_str(closed).is_err());

        let open = r#"
title_filter:
  accept_unmatched_titles: true
quality_filter:
  technical_vocabulary: [python]
  strong_vocabulary: [machine learning]
"#;
        assert!(PipelineConfig::from_yaml_str(open).is_ok());
    }
}
