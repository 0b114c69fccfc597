//! Temporal extraction - Time phrase recognition and normalization
//!
//! Recognizes absolute and relative time expressions in English and
//! Vietnamese and resolves them to UTC timestamps against a caller-supplied
//! reference instant. Resolution is deterministic: the same text and
//! reference always produce the same timestamps.

use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use regex::Regex;
use serde::{Deserialize, Serialize};

// ============================================================================
// TYPES
// ============================================================================

/// A recognized time phrase with its resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporalSpan {
    /// The phrase as it appears in the source
    pub text: String,
    /// Byte offset of the phrase start
    pub start: usize,
    /// Byte offset one past the phrase end
    pub end: usize,
    /// The phrase resolved to a UTC instant
    pub resolved: DateTime<Utc>,
}

// ============================================================================
// PATTERNS
// ============================================================================

static ISO_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").expect("static pattern compiles"));

static SLASH_DATE: LazyLock<Regex> = LazyLock::new(|| {
    // day/month/year — the engine's documented interpretation
    Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b").expect("static pattern compiles")
});

static MONTH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\.?\s+(\d{1,2})(?:,?\s+(\d{4}))?\b",
    )
    .expect("static pattern compiles")
});

static RELATIVE_AGO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(minute|hour|day|week|month)s?\s+ago\b")
        .expect("static pattern compiles")
});

static RELATIVE_AGO_VI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+)\s+(phút|giờ|ngày|tuần|tháng)\s+trước\b")
        .expect("static pattern compiles")
});

static LAST_WEEKDAY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(last|next)\s+(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b")
        .expect("static pattern compiles")
});

static SIMPLE_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(today|yesterday|tomorrow|last week|last month|this morning|tonight|last night)\b")
        .expect("static pattern compiles")
});

static SIMPLE_VI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(hôm nay|hôm qua|ngày mai|tuần trước|tháng trước|tối qua|sáng nay)\b")
        .expect("static pattern compiles")
});

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Time phrase extractor for English and Vietnamese
#[derive(Debug, Default)]
pub struct TemporalExtractor;

impl TemporalExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract all time phrases from `text`, resolving relative expressions
    /// against `reference`. Overlapping matches keep the earliest/longest.
    pub fn extract(&self, text: &str, reference: DateTime<Utc>) -> Vec<TemporalSpan> {
        let mut spans: Vec<TemporalSpan> = Vec::new();

        for m in ISO_DATE.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let (y, mo, d) = (num(&m, 1), num(&m, 2), num(&m, 3));
            if let Some(date) = NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32) {
                push_span(&mut spans, whole, midday(date));
            }
        }

        for m in SLASH_DATE.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let (d, mo, y) = (num(&m, 1), num(&m, 2), num(&m, 3));
            if let Some(date) = NaiveDate::from_ymd_opt(y as i32, mo as u32, d as u32) {
                push_span(&mut spans, whole, midday(date));
            }
        }

        for m in MONTH_NAME.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let month = month_number(&m[1]);
            let day = num(&m, 2) as u32;
            let year = m
                .get(3)
                .and_then(|g| g.as_str().parse::<i32>().ok())
                .unwrap_or_else(|| reference.year());
            if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
                push_span(&mut spans, whole, midday(date));
            }
        }

        for m in RELATIVE_AGO.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let n = num(&m, 1);
            let delta = match m[2].to_lowercase().as_str() {
                "minute" => Duration::minutes(n),
                "hour" => Duration::hours(n),
                "day" => Duration::days(n),
                "week" => Duration::weeks(n),
                _ => Duration::days(30 * n),
            };
            push_span(&mut spans, whole, reference - delta);
        }

        for m in RELATIVE_AGO_VI.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let n = num(&m, 1);
            let delta = match m[2].to_lowercase().as_str() {
                "phút" => Duration::minutes(n),
                "giờ" => Duration::hours(n),
                "ngày" => Duration::days(n),
                "tuần" => Duration::weeks(n),
                _ => Duration::days(30 * n),
            };
            push_span(&mut spans, whole, reference - delta);
        }

        for m in LAST_WEEKDAY.captures_iter(text) {
            let whole = m.get(0).expect("capture 0 always present");
            let target = weekday(&m[2]);
            let backwards = m[1].eq_ignore_ascii_case("last");
            push_span(
                &mut spans,
                whole,
                midday(nearest_weekday(reference.date_naive(), target, backwards)),
            );
        }

        for m in SIMPLE_EN.find_iter(text) {
            let resolved = match m.as_str().to_lowercase().as_str() {
                "today" | "this morning" | "tonight" => reference,
                "yesterday" | "last night" => reference - Duration::days(1),
                "tomorrow" => reference + Duration::days(1),
                "last week" => reference - Duration::weeks(1),
                "last month" => reference - Duration::days(30),
                _ => reference,
            };
            push_raw(&mut spans, m.as_str(), m.start(), m.end(), resolved);
        }

        for m in SIMPLE_VI.find_iter(text) {
            let resolved = match m.as_str().to_lowercase().as_str() {
                "hôm nay" | "sáng nay" => reference,
                "hôm qua" | "tối qua" => reference - Duration::days(1),
                "ngày mai" => reference + Duration::days(1),
                "tuần trước" => reference - Duration::weeks(1),
                "tháng trước" => reference - Duration::days(30),
                _ => reference,
            };
            push_raw(&mut spans, m.as_str(), m.start(), m.end(), resolved);
        }

        spans.sort_by_key(|s| (s.start, std::cmp::Reverse(s.end)));
        dedup_overlaps(spans)
    }
}

fn num(caps: &regex::Captures<'_>, idx: usize) -> i64 {
    caps.get(idx)
        .and_then(|g| g.as_str().parse().ok())
        .unwrap_or(0)
}

fn midday(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).expect("valid fixed time"))
}

fn push_span(spans: &mut Vec<TemporalSpan>, m: regex::Match<'_>, resolved: DateTime<Utc>) {
    push_raw(spans, m.as_str(), m.start(), m.end(), resolved);
}

fn push_raw(spans: &mut Vec<TemporalSpan>, text: &str, start: usize, end: usize, resolved: DateTime<Utc>) {
    spans.push(TemporalSpan {
        text: text.to_string(),
        start,
        end,
        resolved,
    });
}

fn month_number(name: &str) -> u32 {
    match name.to_lowercase().as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        _ => 12,
    }
}

fn weekday(name: &str) -> Weekday {
    match name.to_lowercase().as_str() {
        "monday" => Weekday::Mon,
        "tuesday" => Weekday::Tue,
        "wednesday" => Weekday::Wed,
        "thursday" => Weekday::Thu,
        "friday" => Weekday::Fri,
        "saturday" => Weekday::Sat,
        _ => Weekday::Sun,
    }
}

/// The closest `target` weekday strictly before (or after) `from`
fn nearest_weekday(from: NaiveDate, target: Weekday, backwards: bool) -> NaiveDate {
    let mut date = from;
    loop {
        date = if backwards {
            date - Duration::days(1)
        } else {
            date + Duration::days(1)
        };
        if date.weekday() == target {
            return date;
        }
    }
}

/// Keep the longest span at each position, dropping contained duplicates
fn dedup_overlaps(spans: Vec<TemporalSpan>) -> Vec<TemporalSpan> {
    let mut out: Vec<TemporalSpan> = Vec::with_capacity(spans.len());
    for span in spans {
        if out.last().map(|prev| span.start < prev.end).unwrap_or(false) {
            continue;
        }
        out.push(span);
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================
