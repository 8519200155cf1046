//! Canonical forms for patent types and application dates.
//!
//! Certificates arrive in Chinese and English, and the extraction model
//! spells dates however the certificate did. Both are mapped onto a small
//! canonical vocabulary here so ranking never has to look at raw strings.
//!
//! Both matchers are order-sensitive: the first keyword set and the first
//! date pattern that match win. Numerically ambiguous dates such as
//! `03/04/2020` therefore always resolve to the earlier pattern in
//! [`DATE_FORMATS`] (day-first slash), never to the US dash form.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

/// Canonical invention patent type.
pub const INVENTION: &str = "发明专利";
/// Canonical utility-model patent type.
pub const UTILITY_MODEL: &str = "实用新型专利";
/// Canonical design patent type.
pub const DESIGN: &str = "外观设计专利";

/// Keyword sets checked in this exact order.
const TYPE_KEYWORDS: [(&str, &[&str]); 3] = [
    (INVENTION, &["invention", "invent", "发明"]),
    (UTILITY_MODEL, &["utility", "实用", "实用新型"]),
    (DESIGN, &["design", "外观"]),
];

/// Date patterns tried in this exact order; the whole trimmed string must match.
pub const DATE_FORMATS: [&str; 6] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%Y年%m月%d日",
    "%m-%d-%Y",
    "%d-%m-%Y",
];

/// Each format's digit shape: `%Y` is exactly four digits, `%m` and `%d`
/// one or two. chrono alone would accept `20-01-01` as year 20.
static DATE_SHAPES: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    DATE_FORMATS
        .iter()
        .map(|fmt| (*fmt, shape_of(fmt)))
        .collect()
});

fn shape_of(fmt: &str) -> Regex {
    let mut pattern = String::from("^");
    let mut chars = fmt.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            match chars.next() {
                Some('Y') => pattern.push_str("[0-9]{4}"),
                Some(_) => pattern.push_str("[0-9]{1,2}"),
                None => {}
            }
        } else {
            pattern.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
        }
    }
    pattern.push('$');
    Regex::new(&pattern).expect("valid date shape")
}

/// Map a raw patent-type string onto its canonical Chinese form.
///
/// Matching is case-insensitive keyword containment. Unrecognised input is
/// returned unchanged (trimmed); `None` becomes the empty string.
pub fn normalize_type(raw: Option<&str>) -> String {
    let raw = match raw.map(str::trim) {
        Some(s) if !s.is_empty() => s,
        _ => return String::new(),
    };
    let lower = raw.to_lowercase();
    TYPE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(canonical, _)| (*canonical).to_string())
        .unwrap_or_else(|| raw.to_string())
}

/// Sort priority of a normalized type: invention 1, utility model 2,
/// design 3, anything else (including empty) 4.
pub fn priority_of(normalized: &str) -> u8 {
    match normalize_type(Some(normalized)).as_str() {
        INVENTION => 1,
        UTILITY_MODEL => 2,
        DESIGN => 3,
        _ => 4,
    }
}

/// An application date after normalization.
///
/// Unparseable input maps to [`ParsedDate::SENTINEL`], which orders before
/// every real date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ParsedDate(NaiveDate);

impl ParsedDate {
    /// Stand-in for "no usable date".
    pub const SENTINEL: ParsedDate = ParsedDate(NaiveDate::MIN);

    pub fn is_sentinel(self) -> bool {
        self == Self::SENTINEL
    }

    /// The parsed date, or `None` for the sentinel.
    pub fn date(self) -> Option<NaiveDate> {
        (!self.is_sentinel()).then_some(self.0)
    }

    /// ISO-8601 rendering (`YYYY-MM-DD`), or `None` for the sentinel.
    pub fn iso(self) -> Option<String> {
        self.date().map(|d| d.format("%Y-%m-%d").to_string())
    }
}

impl From<NaiveDate> for ParsedDate {
    fn from(d: NaiveDate) -> Self {
        ParsedDate(d)
    }
}

/// Parse an application date using the first matching pattern in
/// [`DATE_FORMATS`]. Never fails.
pub fn parse_date(raw: Option<&str>) -> ParsedDate {
    let Some(s) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return ParsedDate::SENTINEL;
    };
    DATE_SHAPES
        .iter()
        .filter(|(_, shape)| shape.is_match(s))
        .find_map(|(fmt, _)| NaiveDate::parse_from_str(s, fmt).ok())
        .map(ParsedDate)
        .unwrap_or(ParsedDate::SENTINEL)
}

/// Canonical date for display: ISO when parseable, otherwise the raw
/// string as given.
pub fn canonical_date(raw: Option<&str>) -> Option<String> {
    parse_date(raw)
        .iso()
        .or_else(|| raw.map(str::trim).filter(|s| !s.is_empty()).map(String::from))
}
