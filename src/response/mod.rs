//! LLM response validation and parsing.
//!
//! Raw LLM output is noisy: markdown fences, stray prose, a `$schema`
//! property some models echo back, and control characters. This module
//! strips the noise, validates the payload against the finding schema,
//! and maps it onto domain records. Both `snake_case` and `camelCase`
//! keys are recognised.

use schemars::JsonSchema;
use serde::Deserialize;
use thiserror::Error;

use crate::models::finding::{Finding, FindingSource, Note, Severity, NO_EXPLANATION};

/// Maximum length of response text echoed into error messages.
const ERROR_PREVIEW_LEN: usize = 2000;

/// Errors from response parsing.
#[derive(Error, Debug)]
pub enum ResponseError {
    #[error("invalid LLM response: {reason}. Response: {preview}")]
    InvalidLlmResponse { reason: String, preview: String },
}

impl ResponseError {
    fn invalid(reason: impl Into<String>, raw: &str) -> Self {
        ResponseError::InvalidLlmResponse {
            reason: reason.into(),
            preview: raw.chars().take(ERROR_PREVIEW_LEN).collect(),
        }
    }
}

/// The wire-format review payload the LLM is asked to produce.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawReview {
    pub summary: String,
    pub issues: Vec<RawIssue>,
    #[serde(alias = "nonBlockingNotes")]
    pub non_blocking_notes: Vec<RawNote>,
}

/// One issue as the LLM reports it. Line numbers are signed so that
/// out-of-range values can be filtered instead of failing the parse.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawIssue {
    pub file: String,
    #[serde(alias = "startLine")]
    pub start_line: i64,
    pub severity: Severity,
    pub title: String,
    pub suggestion: String,
    /// Model confidence in `[0, 1]`; range-checked during validation.
    #[serde(default, alias = "confidenceScore")]
    pub confidence_score: Option<f64>,
    #[serde(default, alias = "confidenceExplanation")]
    pub confidence_explanation: Option<String>,
    #[serde(default, alias = "suggestedFix")]
    pub suggested_fix: Option<String>,
}

/// One non-blocking note as the LLM reports it.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RawNote {
    pub file: String,
    pub line: i64,
    #[serde(alias = "text")]
    pub note: String,
}

/// A validated, domain-mapped review payload.
#[derive(Debug, Clone, Default)]
pub struct ParsedReview {
    pub summary: String,
    pub issues: Vec<Finding>,
    pub notes: Vec<Note>,
}

/// JSON Schema for the expected payload, embedded in the system prompt.
pub fn schema_json() -> String {
    let schema = schemars::schema_for!(RawReview);
    serde_json::to_string_pretty(&schema).unwrap_or_else(|_| "{}".to_string())
}

/// Parse and validate a raw LLM response.
///
/// Pre-processing: strip fenced-code markers and surrounding whitespace,
/// drop control characters outside `\t\n\r`, and remove a leading
/// `$schema` property. Issues with `start_line ≤ 0` and notes with
/// `line ≤ 0` are filtered out rather than treated as errors.
pub fn parse_review(raw: &str) -> Result<ParsedReview, ResponseError> {
    let cleaned = strip_control_chars(raw.trim());

    let mut last_err: Option<serde_json::Error> = None;
    for candidate in extract_json_candidates(&cleaned) {
        match serde_json::from_str::<serde_json::Value>(&candidate) {
            Ok(mut value) => {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("$schema");
                }
                let review: RawReview = serde_json::from_value(value)
                    .map_err(|e| ResponseError::invalid(format!("schema mismatch: {e}"), raw))?;
                return validate(review, raw);
            }
            Err(e) => last_err = Some(e),
        }
    }

    Err(ResponseError::invalid(
        match last_err {
            Some(e) => format!("malformed JSON: {e}"),
            None => "empty response".to_string(),
        },
        raw,
    ))
}

/// Map the wire payload onto domain records, enforcing value ranges.
fn validate(review: RawReview, raw: &str) -> Result<ParsedReview, ResponseError> {
    let mut issues = Vec::with_capacity(review.issues.len());
    for issue in review.issues {
        if issue.start_line <= 0 {
            continue;
        }
        if let Some(score) = issue.confidence_score {
            if !(0.0..=1.0).contains(&score) {
                return Err(ResponseError::invalid(
                    format!("confidence score {score} outside [0, 1]"),
                    raw,
                ));
            }
        }
        let explanation = match issue.confidence_explanation {
            Some(text) if text.trim().is_empty() => Some(NO_EXPLANATION.to_string()),
            other => other,
        };
        issues.push(Finding {
            file: issue.file,
            start_line: issue.start_line as u32,
            severity: issue.severity,
            title: issue.title,
            suggestion: issue.suggestion,
            confidence_score: issue.confidence_score,
            confidence_explanation: explanation,
            suggested_fix: issue.suggested_fix,
            source: FindingSource::Llm,
        });
    }

    let notes = review
        .non_blocking_notes
        .into_iter()
        .filter(|n| n.line > 0)
        .map(|n| Note {
            file: n.file,
            line: n.line as u32,
            text: n.note,
        })
        .collect();

    Ok(ParsedReview {
        summary: review.summary,
        issues,
        notes,
    })
}

/// Remove control characters other than `\t`, `\n`, `\r`.
fn strip_control_chars(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\t' | '\n' | '\r'))
        .collect()
}

/// Candidate JSON strings to attempt, most-direct first: the raw text,
/// the outermost brace slice, then any fenced block contents.
fn extract_json_candidates(text: &str) -> Vec<String> {
    let mut candidates = vec![text.to_string()];

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(text[start..=end].to_string());
        }
    }

    for cap in FENCE_RE.captures_iter(text) {
        if let Some(inner) = cap.get(1) {
            let inner = inner.as_str().trim();
            if !inner.is_empty() {
                candidates.push(inner.to_string());
            }
        }
    }

    candidates
}

/// Regex for extracting content inside markdown code fences. The closing
/// ``` must start a line so fences embedded in JSON string values don't
/// truncate the candidate.
static FENCE_RE: std::sync::LazyLock<regex::Regex> =
    std::sync::LazyLock::new(|| regex::Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").unwrap());

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "summary": "Looks mostly fine.",
        "issues": [{
            "file": "src/db.rs",
            "start_line": 42,
            "severity": "major",
            "title": "Unbounded query",
            "suggestion": "Add a LIMIT clause.",
            "confidenceScore": 0.9,
            "confidenceExplanation": "Pattern is unambiguous."
        }],
        "non_blocking_notes": [{"file": "src/db.rs", "line": 50, "note": "Consider an index."}]
    }"#;

    #[test]
    fn parse_valid_payload() {
        let review = parse_review(VALID).unwrap();
        assert_eq!(review.summary, "Looks mostly fine.");
        assert_eq!(review.issues.len(), 1);
        let issue = &review.issues[0];
        assert_eq!(issue.file, "src/db.rs");
        assert_eq!(issue.start_line, 42);
        assert_eq!(issue.severity, Severity::Major);
        assert_eq!(issue.confidence_score, Some(0.9));
        assert_eq!(issue.source, FindingSource::Llm);
        assert_eq!(review.notes.len(), 1);
        assert_eq!(review.notes[0].text, "Consider an index.");
    }

    #[test]
    fn parse_snake_and_camel_case() {
        let camel = r#"{"summary":"s","issues":[{"file":"a.rs","startLine":3,"severity":"minor","title":"T","suggestion":"S"}],"nonBlockingNotes":[]}"#;
        let review = parse_review(camel).unwrap();
        assert_eq!(review.issues[0].start_line, 3);

        let snake = r#"{"summary":"s","issues":[{"file":"a.rs","start_line":3,"severity":"minor","title":"T","suggestion":"S"}],"non_blocking_notes":[]}"#;
        let review = parse_review(snake).unwrap();
        assert_eq!(review.issues[0].start_line, 3);
    }

    #[test]
    fn parse_fenced_payload() {
        let fenced = format!("```json\n{VALID}\n```");
        let review = parse_review(&fenced).unwrap();
        assert_eq!(review.issues.len(), 1);
    }

    #[test]
    fn parse_payload_with_surrounding_prose() {
        let wrapped = format!("Here is my review:\n{VALID}\nLet me know!");
        let review = parse_review(&wrapped).unwrap();
        assert_eq!(review.issues.len(), 1);
    }

    #[test]
    fn leading_schema_property_is_dropped() {
        let with_schema = r#"{"$schema": "https://example.com/review.json", "summary": "ok", "issues": [], "non_blocking_notes": [{"file":"a.rs","line":1,"note":"n"}]}"#;
        let review = parse_review(with_schema).unwrap();
        assert_eq!(review.summary, "ok");
        assert!(review.issues.is_empty());
        assert_eq!(review.notes.len(), 1);
    }

    #[test]
    fn control_characters_are_stripped() {
        let noisy = "{\"summary\":\"ok\u{0000}\",\"issues\":[],\"non_blocking_notes\":[]}";
        let review = parse_review(noisy).unwrap();
        assert_eq!(review.summary, "ok");
    }

    #[test]
    fn tabs_and_newlines_survive_stripping() {
        assert_eq!(strip_control_chars("a\tb\nc\rd"), "a\tb\nc\rd");
        assert_eq!(strip_control_chars("a\u{0001}b"), "ab");
    }

    #[test]
    fn malformed_json_fails() {
        let err = parse_review("not json at all").unwrap_err();
        assert!(err.to_string().contains("invalid LLM response"));
    }

    #[test]
    fn missing_required_field_fails() {
        // No summary.
        let err = parse_review(r#"{"issues":[],"non_blocking_notes":[]}"#).unwrap_err();
        assert!(err.to_string().contains("schema mismatch"));
    }

    #[test]
    fn nonpositive_lines_are_filtered() {
        let payload = r#"{
            "summary": "s",
            "issues": [
                {"file":"a.rs","start_line":0,"severity":"info","title":"zero","suggestion":"x"},
                {"file":"a.rs","start_line":-4,"severity":"info","title":"neg","suggestion":"x"},
                {"file":"a.rs","start_line":7,"severity":"info","title":"keep","suggestion":"x"}
            ],
            "non_blocking_notes": [
                {"file":"a.rs","line":0,"note":"dropped"},
                {"file":"a.rs","line":2,"note":"kept"}
            ]
        }"#;
        let review = parse_review(payload).unwrap();
        assert_eq!(review.issues.len(), 1);
        assert_eq!(review.issues[0].title, "keep");
        assert_eq!(review.notes.len(), 1);
        assert_eq!(review.notes[0].text, "kept");
    }

    #[test]
    fn out_of_range_confidence_fails() {
        let payload = r#"{"summary":"s","issues":[{"file":"a.rs","start_line":1,"severity":"info","title":"T","suggestion":"S","confidence_score":1.5}],"non_blocking_notes":[]}"#;
        let err = parse_review(payload).unwrap_err();
        assert!(err.to_string().contains("outside [0, 1]"));
    }

    #[test]
    fn blank_explanation_gets_default() {
        let payload = r#"{"summary":"s","issues":[{"file":"a.rs","start_line":1,"severity":"info","title":"T","suggestion":"S","confidence_score":0.8,"confidence_explanation":"  "}],"non_blocking_notes":[]}"#;
        let review = parse_review(payload).unwrap();
        assert_eq!(
            review.issues[0].confidence_explanation.as_deref(),
            Some(NO_EXPLANATION)
        );
    }

    #[test]
    fn suggested_fix_is_retained() {
        let payload = r#"{"summary":"s","issues":[{"file":"a.rs","start_line":1,"severity":"info","title":"T","suggestion":"S","suggestedFix":"let x = 1;"}],"non_blocking_notes":[]}"#;
        let review = parse_review(payload).unwrap();
        assert_eq!(review.issues[0].suggested_fix.as_deref(), Some("let x = 1;"));
    }

    #[test]
    fn severity_aliases_accepted() {
        let payload = r#"{"summary":"s","issues":[{"file":"a.rs","start_line":1,"severity":"HIGH","title":"T","suggestion":"S"}],"non_blocking_notes":[]}"#;
        let review = parse_review(payload).unwrap();
        assert_eq!(review.issues[0].severity, Severity::Critical);
    }

    #[test]
    fn empty_response_fails() {
        let err = parse_review("   \n  ").unwrap_err();
        assert!(err.to_string().contains("invalid LLM response"));
    }

    #[test]
    fn schema_json_mentions_required_fields() {
        let schema = schema_json();
        assert!(schema.contains("summary"));
        assert!(schema.contains("issues"));
        assert!(schema.contains("non_blocking_notes"));
        assert!(schema.contains("start_line"));
        assert!(schema.contains("severity"));
    }
}
