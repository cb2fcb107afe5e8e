//! Deterministic rule scorer: the guaranteed final link of the chain.
//!
//! Pure function of its inputs, so chain-exhausted listings stay regression
//! testable without a live backend. Hard gates run first and end scoring at 0;
//! otherwise the score is a weighted literal-overlap between profile terms and
//! the listing text.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::parse::{clamp_score, ScoreOutcome};
use crate::ScoreRequest;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConfig {
    /// Title terms that structurally disqualify the role.
    pub seniority_terms: Vec<String>,
    /// Regex fragments for sponsorship/citizenship-only language.
    pub sponsorship_patterns: Vec<String>,
    /// Highest acceptable years-of-experience requirement.
    pub max_experience_years: u32,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            seniority_terms: [
                "senior", "principal", "lead", "staff", "manager", "head of", "chief",
                "director", "vp", "vice president", "executive",
            ]
            .map(String::from)
            .to_vec(),
            sponsorship_patterns: [
                r"no (visa )?sponsorship",
                r"sponsorship (is )?not (available|offered|provided)",
                r"without sponsorship",
                r"citizens? only",
                r"citizenship (is )?required",
                r"must (be|hold) [^.]{0,40}(citizen|permanent resident)",
                r"permanent residen(ts?|cy) (only|required)",
                r"\bpr required\b",
                r"security clearance",
            ]
            .map(String::from)
            .to_vec(),
            max_experience_years: 2,
        }
    }
}

#[derive(Debug)]
pub struct RuleScorer {
    seniority: Regex,
    sponsorship: Vec<Regex>,
    years: Regex,
    max_experience_years: u32,
}

impl RuleScorer {
    pub fn new(config: &RuleConfig) -> Result<Self, regex::Error> {
        let alternation = config
            .seniority_terms
            .iter()
            .map(|term| regex::escape(term))
            .collect::<Vec<_>>()
            .join("|");
        let seniority = Regex::new(&format!(r"(?i)\b({alternation})\b"))?;
        let sponsorship = config
            .sponsorship_patterns
            .iter()
            .map(|pattern| Regex::new(&format!("(?i){pattern}")))
            .collect::<Result<Vec<_>, _>>()?;
        let years = Regex::new(r"(?i)\b(\d{1,2})\s*\+?\s*years?\b")?;
        Ok(Self { seniority, sponsorship, years, max_experience_years: config.max_experience_years })
    }

    pub fn score(&self, request: &ScoreRequest) -> ScoreOutcome {
        if let Some(gate) = self.hard_gate(request) {
            return ScoreOutcome {
                score: 0,
                matched: Vec::new(),
                unmatched: Vec::new(),
                key_points: vec![gate],
            };
        }
        self.overlap(request)
    }

    fn hard_gate(&self, request: &ScoreRequest) -> Option<String> {
        if let Some(found) = self.seniority.find(&request.listing_title) {
            return Some(format!("hard gate: seniority term \"{}\" in title", found.as_str()));
        }

        let body = format!("{}\n{}", request.listing_description, request.listing_requirements);
        for pattern in &self.sponsorship {
            if let Some(found) = pattern.find(&body) {
                return Some(format!(
                    "hard gate: sponsorship/citizenship restriction (\"{}\")",
                    found.as_str().trim()
                ));
            }
        }

        for capture in self.years.captures_iter(&body) {
            let years: u32 = match capture[1].parse() {
                Ok(years) => years,
                Err(_) => continue,
            };
            if years > self.max_experience_years {
                return Some(format!(
                    "hard gate: requires {years} years of experience (ceiling {})",
                    self.max_experience_years
                ));
            }
        }

        None
    }

    /// Weighted literal overlap. A profile term counts double when it also
    /// appears in the title.
    fn overlap(&self, request: &ScoreRequest) -> ScoreOutcome {
        let terms = extract_profile_terms(&request.profile_text);
        let title = request.listing_title.to_lowercase();
        let body = format!(
            "{}\n{}",
            request.listing_description.to_lowercase(),
            request.listing_requirements.to_lowercase()
        );

        let mut matched = Vec::new();
        let mut unmatched = Vec::new();
        let mut earned = 0u32;
        let mut total = 0u32;

        for term in &terms {
            let in_title = contains_word(&title, term);
            let weight = if in_title { 2 } else { 1 };
            total += weight;
            if in_title || contains_word(&body, term) {
                earned += weight;
                matched.push(term.clone());
            } else {
                unmatched.push(term.clone());
            }
        }

        let score = if total == 0 {
            0
        } else {
            clamp_score(((earned as f64 / total as f64) * 100.0).round() as i64)
        };
        let key_points = vec![format!(
            "rule-based keyword overlap: {} of {} profile terms present",
            matched.len(),
            terms.len()
        )];
        ScoreOutcome { score, matched, unmatched, key_points }
    }
}

const TERM_STOPWORDS: &[&str] = &[
    "and", "or", "the", "with", "of", "in", "a", "an", "to", "for", "on", "at",
    "skills", "experience", "years", "strong", "knowledge", "familiarity",
];

/// Split a free-text profile into candidate skill terms. Lines keep only the
/// part after a label colon; segments split on commas/semicolons/slashes.
fn extract_profile_terms(profile: &str) -> Vec<String> {
    let mut terms = Vec::new();
    for line in profile.lines() {
        let line = line.trim().trim_start_matches(&['-', '*', '•', ' '][..]);
        let line = match line.split_once(':') {
            Some((_, rest)) => rest,
            None => line,
        };
        for segment in line.split(&[',', ';', '/'][..]) {
            let term = segment.trim().to_lowercase();
            if term.len() < 2 || term.len() > 40 {
                continue;
            }
            if TERM_STOPWORDS.contains(&term.as_str()) {
                continue;
            }
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }
    terms
}

/// Substring match with word boundaries on both ends; works for multi-word
/// terms as well.
fn contains_word(haystack: &str, needle: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let boundary_before =
            start == 0 || !haystack[..start].chars().next_back().is_some_and(char::is_alphanumeric);
        let boundary_after =
            end == haystack.len() || !haystack[end..].chars().next().is_some_and(char::is_alphanumeric);
        if boundary_before && boundary_after {
            return true;
        }
        from = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scorer() -> RuleScorer {
        RuleScorer::new(&RuleConfig::default()).expect("default rules compile")
    }

    fn request(title: &str, description: &str, requirements: &str) -> ScoreRequest {
        ScoreRequest {
            profile_text: "Skills: python, pytorch, machine learning, sql".into(),
            listing_title: title.into(),
            listing_description: description.into(),
            listing_requirements: requirements.into(),
        }
    }

    #[test]
    fn sponsorship_language_gates_to_zero_regardless_of_overlap() {
        let req = request(
            "Graduate AI Engineer",
            "Python and machine learning role. No sponsorship available for this position.",
            "python, pytorch, sql",
        );
        let outcome = scorer().score(&req);
        assert_eq!(outcome.score, 0);
        assert!(outcome.key_points[0].contains("sponsorship"));
        assert!(outcome.matched.is_empty());
    }

    #[test]
    fn seniority_in_title_gates_before_anything_else() {
        let req = request(
            "Senior Graduate AI Engineer",
            "python pytorch machine learning sql",
            "",
        );
        let outcome = scorer().score(&req);
        assert_eq!(outcome.score, 0);
        assert!(outcome.key_points[0].contains("seniority"));
    }

    #[test]
    fn excessive_experience_requirement_gates() {
        let req = request(
            "Graduate AI Engineer",
            "We need 5+ years of professional experience with python.",
            "",
        );
        let outcome = scorer().score(&req);
        assert_eq!(outcome.score, 0);
        assert!(outcome.key_points[0].contains("5 years"));
    }

    #[test]
    fn low_experience_requirements_pass_the_gate() {
        let req = request(
            "Graduate AI Engineer",
            "0-2 years experience. Work with python and pytorch on machine learning and sql.",
            "",
        );
        let outcome = scorer().score(&req);
        assert_eq!(outcome.score, 100);
        assert_eq!(outcome.matched.len(), 4);
    }

    #[test]
    fn overlap_reports_matched_and_unmatched_terms() {
        let req = request("Graduate Data Analyst", "Heavy sql reporting work in python.", "");
        let outcome = scorer().score(&req);
        assert!(outcome.matched.contains(&"python".to_string()));
        assert!(outcome.matched.contains(&"sql".to_string()));
        assert!(outcome.unmatched.contains(&"pytorch".to_string()));
        assert!(outcome.score > 0 && outcome.score < 100);
    }

    #[test]
    fn title_terms_carry_double_weight() {
        let in_title = request("Graduate Python Engineer", "python only here", "");
        let in_body = request("Graduate Engineer", "python only here", "");
        let a = scorer().score(&in_title);
        let b = scorer().score(&in_body);
        // same single term matched, but title presence raises its weight share
        assert!(a.score >= b.score);
    }

    #[test]
    fn scorer_is_deterministic() {
        let req = request("Graduate AI Engineer", "python pytorch sql", "machine learning");
        let first = scorer().score(&req);
        let second = scorer().score(&req);
        assert_eq!(first, second);
    }

    #[test]
    fn word_boundaries_prevent_substring_false_positives() {
        assert!(contains_word("knows python well", "python"));
        assert!(!contains_word("pythonic style", "python"));
        assert!(contains_word("machine learning role", "machine learning"));
        assert!(!contains_word("sequel database", "sql"));
    }

    #[test]
    fn empty_profile_scores_zero_without_panicking() {
        let req = ScoreRequest {
            profile_text: String::new(),
            listing_title: "Graduate AI Engineer".into(),
            listing_description: "python".into(),
            listing_requirements: String::new(),
        };
        assert_eq!(scorer().score(&req).score, 0);
    }
}
