//! Wire-format decoding tests: raw scraper output into `SourcePayload`.

use chrono::Utc;
use glint_adapters::{normalize, SourcePayload, SourceSpec};

fn source(id: &str, base: &str) -> SourceSpec {
    SourceSpec { id: id.into(), base_url: base.into() }
}

#[test]
fn board_api_record_decodes_with_nested_company_and_extras() {
    let raw = r#"{
        "kind": "board_api",
        "title": "Graduate AI Engineer",
        "company": {"name": "Acme Pty Ltd"},
        "listing_url": "https://board.example/job/42",
        "location": {"city": "Perth", "region": "WA"},
        "description": "Build ML pipelines in Python.",
        "requirements": "Python, PyTorch",
        "tracking_token": "ignored-by-us",
        "promoted": true
    }"#;
    let payload: SourcePayload = serde_json::from_str(raw).expect("decodes");
    let draft = normalize(&payload, &source("board", "https://board.example"), Utc::now())
        .expect("normalizes");
    assert_eq!(draft.title, "Graduate AI Engineer");
    assert_eq!(draft.company, "Acme Pty Ltd");
    assert_eq!(draft.location.as_deref(), Some("Perth, WA"));
    assert_eq!(draft.requirement_text.as_deref(), Some("Python, PyTorch"));
}

#[test]
fn scraped_card_decodes_with_relative_href_and_aliases() {
    let raw = r#"{
        "kind": "scraped_card",
        "title": "Junior ML Engineer",
        "company": "Globex",
        "href": "/job/7",
        "snippet": "Entry level role working on models.",
        "work_type": "Full time",
        "posted": "2d ago"
    }"#;
    let payload: SourcePayload = serde_json::from_str(raw).expect("decodes");
    let draft = normalize(&payload, &source("cards", "https://cards.example"), Utc::now())
        .expect("normalizes");
    assert_eq!(draft.url, "https://cards.example/job/7");
    assert_eq!(draft.description, "Entry level role working on models.");
    assert_eq!(draft.employment_type.as_deref(), Some("Full time"));
    assert_eq!(draft.posted_date.as_deref(), Some("2d ago"));
}

#[test]
fn manual_record_with_missing_url_fails_validation() {
    let raw = r#"{"kind": "manual", "title": "Graduate Role", "company": "Acme"}"#;
    let payload: SourcePayload = serde_json::from_str(raw).expect("decodes");
    let err = normalize(&payload, &source("manual", "https://manual.example"), Utc::now())
        .unwrap_err();
    assert_eq!(err.to_string(), "missing required field: url");
}
