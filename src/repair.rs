//! Response repair: recover a JSON object from a raw model reply.
//!
//! Even with JSON mode switched on, models regularly wrap their answer in a
//! fenced code block (three backticks plus a `json` tag), or surround it
//! with a sentence of commentary. The rules here are the same for every
//! provider:
//!
//! 1. A leading fence marker and a trailing fence marker are stripped
//!    independently, then the remainder is parsed.
//! 2. With no leading marker, the whole reply is parsed as-is.
//! 3. If that fails, the first complete fenced segment anywhere in the reply
//!    is parsed instead. This also covers a fenced answer followed by a
//!    closing remark.
//!
//! A reply that had a candidate which failed to parse is
//! [`RepairError::Malformed`]; a reply with no fenced segment that also
//! failed to parse whole is [`RepairError::NoStructuredContent`]. Callers
//! treat both as "no record for this file".

use crate::record::json_kind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use thiserror::Error;

/// A parsed reply: the top-level JSON object.
pub type StructuredRecord = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepairError {
    /// A candidate segment was found but is not a valid JSON object.
    #[error("reply is not a valid JSON object: {0}")]
    Malformed(String),

    /// No fenced segment, and the unmodified reply did not parse.
    #[error("no structured content in reply: {0}")]
    NoStructuredContent(String),
}

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*").expect("valid regex"));

static RE_TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```\s*$").expect("valid regex"));

static RE_EMBEDDED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*(.*?)```").expect("valid regex"));

/// Strip fence wrapping from `raw` and parse it as a JSON object.
pub fn repair_and_parse(raw: &str) -> Result<StructuredRecord, RepairError> {
    let trimmed = raw.trim();
    let had_leading = RE_LEADING_FENCE.is_match(trimmed);
    let unwrapped = strip_fences(trimmed);

    match parse_object(unwrapped) {
        Ok(map) => Ok(map),
        Err(detail) if had_leading => embedded_segment(trimmed)
            .and_then(|segment| parse_object(segment).ok())
            .ok_or(RepairError::Malformed(detail)),
        Err(detail) => match embedded_segment(trimmed) {
            Some(segment) => parse_object(segment).map_err(RepairError::Malformed),
            None => Err(RepairError::NoStructuredContent(detail)),
        },
    }
}

fn strip_fences(s: &str) -> &str {
    let s = match RE_LEADING_FENCE.find(s) {
        Some(m) => &s[m.end()..],
        None => s,
    };
    let s = match RE_TRAILING_FENCE.find(s) {
        Some(m) => &s[..m.start()],
        None => s,
    };
    s.trim()
}

fn embedded_segment(s: &str) -> Option<&str> {
    RE_EMBEDDED_FENCE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

fn parse_object(candidate: &str) -> Result<StructuredRecord, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found {}", json_kind(&other))),
        Err(e) => Err(format!(
            "{e} (reply starts with {:?})",
            candidate.chars().take(80).collect::<String>()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"{"专利号": "ZL2020202178118", "专利权人": "X"}"#;

    #[test]
    fn bare_object_parses() {
        let map = repair_and_parse(BARE).unwrap();
        assert_eq!(map["专利号"], "ZL2020202178118");
    }

    #[test]
    fn fenced_reply_matches_bare() {
        let fenced = format!("```json\n{BARE}\n```");
        assert_eq!(repair_and_parse(&fenced), repair_and_parse(BARE));
    }

    #[test]
    fn untagged_fence_and_surrounding_whitespace() {
        let fenced = format!("\n\n```\n{BARE}\n```\n");
        assert_eq!(repair_and_parse(&fenced).unwrap(), repair_and_parse(BARE).unwrap());
    }

    #[test]
    fn leading_marker_without_trailing() {
        let fenced = format!("```json\n{BARE}");
        assert!(repair_and_parse(&fenced).is_ok());
    }

    #[test]
    fn trailing_marker_without_leading() {
        let fenced = format!("{BARE}\n```");
        assert!(repair_and_parse(&fenced).is_ok());
    }

    #[test]
    fn embedded_fence_is_recovered() {
        let reply = format!("Here is the extracted data:\n```json\n{BARE}\n```\nLet me know!");
        assert_eq!(repair_and_parse(&reply), repair_and_parse(BARE));
    }

    #[test]
    fn fenced_reply_followed_by_prose() {
        let reply = format!("```json\n{BARE}\n```\nHope this helps!");
        assert_eq!(repair_and_parse(&reply), repair_and_parse(BARE));
        let err = repair_and_parse("```json\n{\"a\": \n```\nHope this helps!").unwrap_err();
        assert!(matches!(err, RepairError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn first_embedded_segment_wins() {
        let reply = "Result:\n```json\n{\"a\": 1}\n```\nand\n```json\n{\"a\": 2}\n```";
        assert_eq!(repair_and_parse(reply).unwrap()["a"], 1);
    }

    #[test]
    fn malformed_fenced_content() {
        let err = repair_and_parse("```json\n{\"a\": \n```").unwrap_err();
        assert!(matches!(err, RepairError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn malformed_embedded_content() {
        let err = repair_and_parse("Sure:\n```json\n{not json}\n```").unwrap_err();
        assert!(matches!(err, RepairError::Malformed(_)), "got {err:?}");
    }

    #[test]
    fn prose_without_fence_is_no_structured_content() {
        let err = repair_and_parse("I could not read this certificate.").unwrap_err();
        assert!(matches!(err, RepairError::NoStructuredContent(_)), "got {err:?}");
    }

    #[test]
    fn non_object_json_is_rejected() {
        let err = repair_and_parse("```json\n[1, 2]\n```").unwrap_err();
        assert!(err.to_string().contains("an array"), "got {err}");
        assert!(repair_and_parse("null").is_err());
    }

    #[test]
    fn empty_reply_is_rejected() {
        assert!(matches!(
            repair_and_parse("   ").unwrap_err(),
            RepairError::NoStructuredContent(_)
        ));
    }
}
