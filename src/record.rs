//! The canonical patent record and record-set hygiene.
//!
//! Records serialise with the Chinese column keys the extraction prompt asks
//! for, so a model reply, a render-only JSON payload and the JSON output all
//! share one shape.

use crate::error::PatentError;
use crate::normalize::{self, ParsedDate};
use serde::{de, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::warn;

/// One patent certificate, as extracted.
///
/// Every text field is `None` when the certificate did not show it; an empty
/// string is never stored. `source_path` is always set for records produced
/// by extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatentRecord {
    #[serde(rename = "专利号")]
    pub patent_number: Option<String>,

    #[serde(rename = "专利名称")]
    pub title: Option<String>,

    #[serde(rename = "专利权人")]
    pub holder: Option<String>,

    /// Patent type as written on the certificate.
    #[serde(rename = "专利类型")]
    pub patent_type: Option<String>,

    /// Inventors joined with `;`.
    #[serde(rename = "发明人")]
    pub inventors: Option<String>,

    /// Application date as written, kept for audit.
    #[serde(rename = "申请日")]
    pub application_date: Option<String>,

    #[serde(rename = "文件路径")]
    pub source_path: String,
}

/// Accepted keys per field, canonical spelling first.
const NUMBER_KEYS: &[&str] = &["专利号"];
const TITLE_KEYS: &[&str] = &["专利名称"];
const HOLDER_KEYS: &[&str] = &["专利权人", "权利人"];
const TYPE_KEYS: &[&str] = &["专利类型"];
const INVENTOR_KEYS: &[&str] = &["发明人"];
const DATE_KEYS: &[&str] = &["申请日", "申请日期"];
const SOURCE_KEY: &str = "文件路径";

/// Reads through a plain object so alternate spellings never collide: the
/// first key in each list that carries text wins, unknown keys are ignored.
impl<'de> Deserialize<'de> for PatentRecord {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        let mut text = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| fields.remove(*k))
                .find_map(value_to_text)
        };

        let patent_number = text(NUMBER_KEYS);
        let title = text(TITLE_KEYS);
        let holder = text(HOLDER_KEYS);
        let patent_type = text(TYPE_KEYS);
        let inventors = text(INVENTOR_KEYS);
        let application_date = text(DATE_KEYS);
        let source_path = match fields.remove(SOURCE_KEY) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s,
            Some(other) => {
                return Err(de::Error::custom(format!(
                    "{SOURCE_KEY}: expected a string, got {}",
                    json_kind(&other)
                )))
            }
        };

        Ok(PatentRecord {
            patent_number,
            title,
            holder,
            patent_type,
            inventors,
            application_date,
            source_path,
        })
    }
}

impl PatentRecord {
    /// Holder for ranking and grouping; absent sorts as the empty string.
    pub fn holder_key(&self) -> &str {
        self.holder.as_deref().unwrap_or("")
    }

    pub fn normalized_type(&self) -> String {
        normalize::normalize_type(self.patent_type.as_deref())
    }

    pub fn type_priority(&self) -> u8 {
        normalize::priority_of(&self.normalized_type())
    }

    pub fn parsed_date(&self) -> ParsedDate {
        normalize::parse_date(self.application_date.as_deref())
    }

    /// True when no data field was found at all.
    pub fn is_blank(&self) -> bool {
        self.patent_number.is_none()
            && self.title.is_none()
            && self.holder.is_none()
            && self.patent_type.is_none()
            && self.inventors.is_none()
            && self.application_date.is_none()
    }
}

/// Strings, numbers and arrays of strings become text; blanks and literal
/// `null`/`none` become `None`.
fn value_to_text(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => clean_text(&s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.into_iter().filter_map(value_to_text).collect();
            (!parts.is_empty()).then(|| parts.join(";"))
        }
        Value::Object(_) => clean_text(&value.to_string()),
    }
}

fn clean_text(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() || t.eq_ignore_ascii_case("null") || t.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(t.to_string())
    }
}

/// Parse render-only input: a single JSON object or an array of objects.
pub fn parse_records_json(json: &str) -> Result<Vec<PatentRecord>, PatentError> {
    let value: Value = serde_json::from_str(json)
        .map_err(|e| PatentError::InvalidRecords(format!("not valid JSON: {e}")))?;
    let items = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(PatentError::InvalidRecords(format!(
                "expected an object or an array of objects, got {}",
                json_kind(&other)
            )))
        }
    };
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<PatentRecord>(item)
                .map_err(|e| PatentError::InvalidRecords(format!("record {}: {e}", i + 1)))
        })
        .collect()
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Drop blank records and repeated source paths (first occurrence wins).
///
/// Records without a source path (render-only input) are never treated as
/// duplicates of each other.
pub fn dedup_and_validate(records: Vec<PatentRecord>) -> Vec<PatentRecord> {
    let mut seen: HashSet<String> = HashSet::new();
    records
        .into_iter()
        .filter(|r| {
            if r.is_blank() {
                warn!("Dropping blank record (source: '{}')", r.source_path);
                return false;
            }
            if r.source_path.is_empty() {
                return true;
            }
            if !seen.insert(r.source_path.clone()) {
                warn!("Dropping duplicate record for '{}'", r.source_path);
                return false;
            }
            true
        })
        .collect()
}
