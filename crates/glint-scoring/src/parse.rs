//! Backend response parsing.
//!
//! Backends promise structured output but deliver it unevenly. Three
//! strategies run in order: a strict JSON document, a JSON object embedded in
//! prose, and a loosely-keyed line format. Only when all three fail is the
//! response declared malformed.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("no parse strategy produced a score")]
pub struct MalformedResponse;

/// Parsed scoring payload, before it is tagged with backend and profile
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreOutcome {
    pub score: i64,
    pub matched: Vec<String>,
    pub unmatched: Vec<String>,
    pub key_points: Vec<String>,
}

pub fn clamp_score(score: i64) -> i64 {
    score.clamp(0, 100)
}

pub fn parse_response(body: &str) -> Result<ScoreOutcome, MalformedResponse> {
    if let Some(outcome) = parse_strict_json(body) {
        return Ok(outcome);
    }
    if let Some(outcome) = parse_embedded_json(body) {
        return Ok(outcome);
    }
    if let Some(outcome) = parse_keyed_lines(body) {
        return Ok(outcome);
    }
    Err(MalformedResponse)
}

fn parse_strict_json(body: &str) -> Option<ScoreOutcome> {
    let value: Value = serde_json::from_str(body.trim()).ok()?;
    outcome_from_value(&value)
}

/// Pull a JSON object out of surrounding prose: fenced code block first,
/// outermost braces second.
fn parse_embedded_json(body: &str) -> Option<ScoreOutcome> {
    if let Some(fenced) = extract_fenced_block(body) {
        if let Ok(value) = serde_json::from_str::<Value>(fenced.trim()) {
            if let Some(outcome) = outcome_from_value(&value) {
                return Some(outcome);
            }
        }
    }
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    let value: Value = serde_json::from_str(&body[start..=end]).ok()?;
    outcome_from_value(&value)
}

fn extract_fenced_block(body: &str) -> Option<&str> {
    let open = body.find("```")?;
    let after = &body[open + 3..];
    let after = after.strip_prefix("json").unwrap_or(after);
    let close = after.find("```")?;
    Some(&after[..close])
}

/// `SCORE: 70` / `MATCHED: a, b` / `UNMATCHED: c` / `KEY_POINTS: d; e`
fn parse_keyed_lines(body: &str) -> Option<ScoreOutcome> {
    let mut score = None;
    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    let mut key_points = Vec::new();

    for line in body.lines() {
        let line = line.trim().trim_start_matches(&['-', '*', ' '][..]);
        if let Some(rest) = strip_key(line, "SCORE") {
            score = rest
                .trim()
                .trim_end_matches(&['%', '.'][..])
                .split_whitespace()
                .next()
                .and_then(|token| token.parse::<f64>().ok());
        } else if let Some(rest) = strip_key(line, "MATCHED") {
            matched = split_list(rest);
        } else if let Some(rest) = strip_key(line, "UNMATCHED") {
            unmatched = split_list(rest);
        } else if let Some(rest) = strip_key(line, "KEY_POINTS") {
            key_points = split_list(rest);
        }
    }

    score.map(|score| ScoreOutcome {
        score: clamp_score(score.round() as i64),
        matched,
        unmatched,
        key_points,
    })
}

fn strip_key<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let rest = line.strip_prefix(key)?;
    let rest = rest.trim_start();
    rest.strip_prefix(':')
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .map(str::trim)
        .filter(|item| !item.is_empty() && *item != "none")
        .map(ToString::to_string)
        .collect()
}

/// Lenient extraction from a JSON object: tolerates the score living at the
/// top level, under an alternate key, or inside a breakdown object.
fn outcome_from_value(value: &Value) -> Option<ScoreOutcome> {
    let object = value.as_object()?;
    let score = number_at(value, &["score"])
        .or_else(|| number_at(value, &["final_score"]))
        .or_else(|| number_at(value, &["score_breakdown", "final_score"]))?;

    let matched = list_at(object, &["matched", "matched_requirements", "strong_matches"]);
    let unmatched = list_at(object, &["unmatched", "unmatched_requirements", "gaps"]);
    let key_points = list_at(object, &["key_points", "reasons", "rationale"]);

    Some(ScoreOutcome {
        score: clamp_score(score.round() as i64),
        matched,
        unmatched,
        key_points,
    })
}

fn number_at(value: &Value, path: &[&str]) -> Option<f64> {
    let mut current = value;
    for segment in path {
        current = current.get(segment)?;
    }
    current
        .as_f64()
        .or_else(|| current.as_str().and_then(|s| s.trim().parse().ok()))
}

fn list_at(object: &serde_json::Map<String, Value>, keys: &[&str]) -> Vec<String> {
    for key in keys {
        let Some(value) = object.get(*key) else { continue };
        match value {
            Value::Array(items) => {
                return items
                    .iter()
                    .filter_map(|item| item.as_str().map(ToString::to_string))
                    .collect();
            }
            Value::String(joined) => return split_list(joined),
            _ => {}
        }
    }
    Vec::new()
}
