//! Line parsers for crawler and recommendation-engine log lines.
//!
//! Every line kind has exactly one anchored pattern. `is_line_kind` answers the
//! classification question; the `parse_*` functions fail hard when a line does
//! not satisfy the kind's format contract.

use std::fmt;

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::ParseError;
use crate::models::{LogItem, RecommendationScore};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static PAGE_CRAWLED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) INFO:[\w.-]+:PAGE_CRAWLED: url (.*) took (\d+\.\d+) ms and (\d+) bytes$",
    )
    .expect("page crawled pattern compiles")
});

static CRAWL_FREQUENCY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) INFO:scrapy\.extensions\.logstats:Crawled (\d+) pages \(at (\d+) pages/min\), scraped (\d+) items \(at (\d+) items/min\)$",
    )
    .expect("crawl frequency pattern compiles")
});

static PAGE_CRAWL_ERROR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) ERROR:[\w.-]+:PAGE_CRAWL_ERROR: (.*) on (.*)$",
    )
    .expect("page crawl error pattern compiles")
});

static RECOMMENDATION_SCORE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(.*) (\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}),\d+ \[INFO\] recommendation_engine top1: (.*) top10: (.*) top50: (.*)$",
    )
    .expect("recommendation score pattern compiles")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LineKind {
    PageCrawled,
    CrawlFrequency,
    PageCrawlError,
    RecommendationScore,
}

impl LineKind {
    fn pattern(self) -> &'static Regex {
        match self {
            LineKind::PageCrawled => &PAGE_CRAWLED_RE,
            LineKind::CrawlFrequency => &CRAWL_FREQUENCY_RE,
            LineKind::PageCrawlError => &PAGE_CRAWL_ERROR_RE,
            LineKind::RecommendationScore => &RECOMMENDATION_SCORE_RE,
        }
    }

    /// Number of fields a line of this kind must capture.
    pub fn field_count(self) -> usize {
        match self {
            LineKind::PageCrawled => 4,
            LineKind::CrawlFrequency => 5,
            LineKind::PageCrawlError => 3,
            LineKind::RecommendationScore => 5,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LineKind::PageCrawled => "page-crawled",
            LineKind::CrawlFrequency => "crawl-frequency",
            LineKind::PageCrawlError => "page-crawl-error",
            LineKind::RecommendationScore => "recommendation-score",
        }
    }
}

impl fmt::Display for LineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether the whole line matches the pattern for `kind`.
pub fn is_line_kind(line: &str, kind: LineKind) -> bool {
    kind.pattern().is_match(line)
}

fn match_fields(line: &str, kind: LineKind) -> Result<Vec<&str>, ParseError> {
    let captures = kind
        .pattern()
        .captures(line)
        .ok_or(ParseError::Format { kind })?;

    let found = captures.len() - 1;
    if found != kind.field_count() {
        return Err(ParseError::FieldCount {
            kind,
            expected: kind.field_count(),
            found,
        });
    }

    (1..captures.len())
        .map(|index| {
            captures
                .get(index)
                .map(|m| m.as_str())
                .ok_or(ParseError::MissingField { kind, index })
        })
        .collect()
}

/// Parse `YYYY-MM-DD HH:MM:SS`, dropping any sub-second fraction.
pub fn parse_timestamp(kind: LineKind, value: &str) -> Result<NaiveDateTime, ParseError> {
    let whole_seconds = value.split('.').next().unwrap_or(value);
    NaiveDateTime::parse_from_str(whole_seconds, TIMESTAMP_FORMAT).map_err(|_| {
        ParseError::InvalidTimestamp {
            kind,
            value: value.to_string(),
        }
    })
}

fn parse_number<T: std::str::FromStr>(
    kind: LineKind,
    field: &'static str,
    value: &str,
) -> Result<T, ParseError> {
    value.parse::<T>().map_err(|_| ParseError::InvalidNumber {
        kind,
        field,
        value: value.to_string(),
    })
}

/// `<ts> INFO:<logger>:PAGE_CRAWLED: url <url> took <float> ms and <int> bytes`
pub fn parse_page_crawled(line: &str) -> Result<LogItem, ParseError> {
    let kind = LineKind::PageCrawled;
    let fields = match_fields(line, kind)?;
    Ok(LogItem::crawled(
        fields[1],
        parse_timestamp(kind, fields[0])?,
        parse_number(kind, "page_load_speed", fields[2])?,
        parse_number(kind, "page_size", fields[3])?,
    ))
}

/// Pages-per-minute rate from a scrapy logstats line.
pub fn parse_crawl_frequency(line: &str) -> Result<u64, ParseError> {
    let kind = LineKind::CrawlFrequency;
    let fields = match_fields(line, kind)?;
    parse_number(kind, "pages_per_minute", fields[2])
}

/// `<ts> ERROR:<logger>:PAGE_CRAWL_ERROR: <reason> on <url>`
pub fn parse_page_crawl_error(line: &str) -> Result<LogItem, ParseError> {
    let kind = LineKind::PageCrawlError;
    let fields = match_fields(line, kind)?;
    Ok(LogItem::failed(
        fields[2],
        parse_timestamp(kind, fields[0])?,
        fields[1],
    ))
}

pub fn parse_recommendation_score(line: &str) -> Result<RecommendationScore, ParseError> {
    let kind = LineKind::RecommendationScore;
    let fields = match_fields(line, kind)?;
    Ok(RecommendationScore {
        top1: parse_number(kind, "top1", fields[2])?,
        top10: parse_number(kind, "top10", fields[3])?,
        top50: parse_number(kind, "top50", fields[4])?,
    })
}
