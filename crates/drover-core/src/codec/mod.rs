//! Wire codec for the oracle's verdict dialect.
//!
//! The oracle replies with a JSON object, often wrapped in a Markdown
//! fenced block and surrounded by prose. Parsing is deliberately liberal
//! (fence stripping, balanced-brace scan) because oracle output drifts;
//! the liberal strategy is confined to this module and everything
//! downstream sees only validated [`Verdict`] values. The system prompts
//! that elicit the dialect are versioned alongside the parser in
//! [`prompts`].

pub mod prompt;
pub mod prompts;

use drover_types::Verdict;
use thiserror::Error;

/// Maximum characters of oracle output carried in an error excerpt.
const EXCERPT_MAX: usize = 200;

/// Errors from decoding an oracle reply.
#[derive(Debug, Error)]
pub enum CodecError {
    /// No JSON object could be recovered from the reply text.
    #[error("no JSON object recoverable from oracle output (excerpt: {excerpt:?})")]
    MalformedVerdict { excerpt: String },

    /// The reply parsed as JSON but violates the verdict contract.
    #[error("verdict violates the schema: {reason} (excerpt: {excerpt:?})")]
    InvalidSchema { reason: String, excerpt: String },
}

/// Parse an oracle reply into a validated [`Verdict`].
///
/// Steps: strip one layer of triple-backtick fencing if present, locate
/// the first balanced `{...}` span, decode as JSON, then validate against
/// the verdict schema. A success verdict with an empty result is passed
/// through; the task runner folds that case into a needs-debug
/// transition.
pub fn parse_verdict(text: &str) -> Result<Verdict, CodecError> {
    let body = strip_code_fence(text);

    let span = balanced_json_span(body).ok_or_else(|| CodecError::MalformedVerdict {
        excerpt: excerpt(text),
    })?;

    let value: serde_json::Value =
        serde_json::from_str(span).map_err(|_| CodecError::MalformedVerdict {
            excerpt: excerpt(text),
        })?;

    let verdict: Verdict =
        serde_json::from_value(value).map_err(|e| CodecError::InvalidSchema {
            reason: e.to_string(),
            excerpt: excerpt(span),
        })?;

    verdict
        .check_error_invariant()
        .map_err(|reason| CodecError::InvalidSchema {
            reason,
            excerpt: excerpt(span),
        })?;

    Ok(verdict)
}

/// Serialize a verdict back to its wire form.
///
/// `parse_verdict(&serialize_verdict(v))` is an identity for any
/// well-formed verdict.
pub fn serialize_verdict(verdict: &Verdict) -> String {
    serde_json::to_string(verdict).expect("verdict serialization cannot fail")
}

/// Strip one layer of triple-backtick fencing, if the text is fenced.
///
/// Handles an optional info string (e.g. ```` ```json ````) on the opening
/// fence. Unfenced text is returned trimmed.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(newline) = rest.find('\n') else {
        return trimmed;
    };
    let body = &rest[newline + 1..];
    match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    }
}

/// Locate the first balanced `{...}` span in `text`.
///
/// The scan is string- and escape-aware, so braces inside JSON string
/// literals do not affect the depth count.
pub(crate) fn balanced_json_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Clamp text to [`EXCERPT_MAX`] characters for error diagnostics.
pub(crate) fn excerpt(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= EXCERPT_MAX {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(EXCERPT_MAX).collect();
    format!("{head}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_types::{LogLevel, VerdictStatus};

    const PLAIN: &str = r#"{"status":"success","result":"file created","log_entries":[{"level":"info","message":"wrote /a","timestamp":"2025-01-01T00:00:00Z"}]}"#;

    #[test]
    fn parses_plain_json() {
        let verdict = parse_verdict(PLAIN).expect("should parse");
        assert_eq!(verdict.status, VerdictStatus::Success);
        assert_eq!(verdict.result, "file created");
        assert_eq!(verdict.log_entries.len(), 1);
        assert_eq!(verdict.log_entries[0].level, LogLevel::Info);
    }

    #[test]
    fn parses_fenced_json() {
        let text = format!("```json\n{PLAIN}\n```");
        let verdict = parse_verdict(&text).expect("should parse");
        assert_eq!(verdict.result, "file created");
    }

    #[test]
    fn parses_bare_fence_without_info_string() {
        let text = format!("```\n{PLAIN}\n```");
        let verdict = parse_verdict(&text).expect("should parse");
        assert_eq!(verdict.status, VerdictStatus::Success);
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let text = format!("Here is my verdict:\n\n{PLAIN}\n\nLet me know if anything else.");
        let verdict = parse_verdict(&text).expect("should parse");
        assert_eq!(verdict.result, "file created");
    }

    #[test]
    fn balanced_scan_ignores_braces_in_strings() {
        let text = r#"{"status":"success","result":"used {braces} and \"quotes\"","log_entries":[]}"#;
        let verdict = parse_verdict(text).expect("should parse");
        assert_eq!(verdict.result, r#"used {braces} and "quotes""#);
    }

    #[test]
    fn balanced_scan_takes_first_complete_object() {
        let text = r#"{"status":"success","result":"first","log_entries":[]} {"status":"failed"}"#;
        let verdict = parse_verdict(text).expect("should parse");
        assert_eq!(verdict.result, "first");
    }

    #[test]
    fn rejects_plain_text() {
        let err = parse_verdict("not json at all").unwrap_err();
        assert!(
            matches!(err, CodecError::MalformedVerdict { .. }),
            "expected MalformedVerdict, got: {err}"
        );
    }

    #[test]
    fn rejects_unterminated_object() {
        let err = parse_verdict(r#"{"status":"success","result":"x""#).unwrap_err();
        assert!(matches!(err, CodecError::MalformedVerdict { .. }));
    }

    #[test]
    fn rejects_wrong_shape_as_schema_violation() {
        let err = parse_verdict(r#"{"status":"sideways","result":"x","log_entries":[]}"#).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidSchema { .. }),
            "expected InvalidSchema, got: {err}"
        );
    }

    #[test]
    fn rejects_missing_log_entries() {
        let err = parse_verdict(r#"{"status":"success","result":"x"}"#).unwrap_err();
        assert!(matches!(err, CodecError::InvalidSchema { .. }));
    }

    #[test]
    fn rejects_needs_debug_without_error() {
        let err =
            parse_verdict(r#"{"status":"needs-debug","result":"","log_entries":[]}"#).unwrap_err();
        assert!(
            matches!(err, CodecError::InvalidSchema { ref reason, .. } if reason.contains("error")),
            "expected error-field violation, got: {err}"
        );
    }

    #[test]
    fn accepts_needs_debug_with_error() {
        let text = r#"{"status":"needs-debug","result":"","error":{"message":"syntax error"},"log_entries":[]}"#;
        let verdict = parse_verdict(text).expect("should parse");
        assert_eq!(verdict.status, VerdictStatus::NeedsDebug);
        assert_eq!(verdict.error.unwrap().message, "syntax error");
    }

    #[test]
    fn empty_result_success_passes_codec() {
        // The runner, not the codec, folds this into needs-debug.
        let verdict =
            parse_verdict(r#"{"status":"success","result":"","log_entries":[]}"#).expect("parses");
        assert_eq!(verdict.status, VerdictStatus::Success);
        assert!(verdict.result.is_empty());
    }

    #[test]
    fn excerpt_is_bounded() {
        let long = "x".repeat(5000);
        let err = parse_verdict(&long).unwrap_err();
        let CodecError::MalformedVerdict { excerpt } = err else {
            panic!("expected MalformedVerdict");
        };
        assert!(excerpt.chars().count() <= EXCERPT_MAX + 3);
        assert!(excerpt.ends_with("..."));
    }

    #[test]
    fn serialize_parse_roundtrip() {
        let verdict = parse_verdict(PLAIN).unwrap();
        let wire = serialize_verdict(&verdict);
        let back = parse_verdict(&wire).unwrap();
        assert_eq!(verdict, back);
    }
}
