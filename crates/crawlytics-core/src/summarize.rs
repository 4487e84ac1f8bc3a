//! Summaries of raw log lines into typed records.
//!
//! Lines that are not of the summary's kind are skipped. A line that is of
//! the kind but fails to parse aborts the summary with its 1-based line number.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{ParseError, SummaryError};
use crate::lines::LineSource;
use crate::models::{LogItem, RecommendationScore};
use crate::parse::{
    is_line_kind, parse_crawl_frequency, parse_page_crawl_error, parse_page_crawled,
    parse_recommendation_score, LineKind,
};

fn summarize_kind<T>(
    source: &LineSource,
    kind: LineKind,
    parse: fn(&str) -> Result<T, ParseError>,
) -> Result<Vec<T>, SummaryError> {
    let mut records = Vec::new();
    for (index, line) in source.iter()?.enumerate() {
        let line = line?;
        if !is_line_kind(&line, kind) {
            continue;
        }
        let record = parse(&line).map_err(|source| SummaryError::Parse {
            line_number: index + 1,
            source,
        })?;
        records.push(record);
    }
    debug!(kind = %kind, count = records.len(), "summarized log lines");
    Ok(records)
}

/// Page-crawled events in input order.
pub fn summarize_info(source: &LineSource) -> Result<Vec<LogItem>, SummaryError> {
    summarize_kind(source, LineKind::PageCrawled, parse_page_crawled)
}

/// Page-crawl-error events in input order.
pub fn summarize_errors(source: &LineSource) -> Result<Vec<LogItem>, SummaryError> {
    summarize_kind(source, LineKind::PageCrawlError, parse_page_crawl_error)
}

pub fn summarize_recommendations(
    source: &LineSource,
) -> Result<Vec<RecommendationScore>, SummaryError> {
    summarize_kind(
        source,
        LineKind::RecommendationScore,
        parse_recommendation_score,
    )
}

/// Bucket key for a line: its first two `:`-separated fields, which for a
/// timestamped line is the `YYYY-MM-DD HH:MM` minute.
fn frequency_bucket(line: &str) -> String {
    line.splitn(3, ':').take(2).collect::<Vec<_>>().join(":")
}

/// One crawl-rate sum per bucket, ordered by bucket key.
///
/// Every line opens a bucket. Buckets without crawl-stats lines sum to zero.
pub fn summarize_frequency(source: &LineSource) -> Result<Vec<u64>, SummaryError> {
    let mut buckets: BTreeMap<String, u64> = BTreeMap::new();
    for (index, line) in source.iter()?.enumerate() {
        let line = line?;
        let total = buckets.entry(frequency_bucket(&line)).or_insert(0);
        if is_line_kind(&line, LineKind::CrawlFrequency) {
            *total += parse_crawl_frequency(&line).map_err(|source| SummaryError::Parse {
                line_number: index + 1,
                source,
            })?;
        }
    }
    debug!(buckets = buckets.len(), "summarized crawl frequency");
    Ok(buckets.into_values().collect())
}
