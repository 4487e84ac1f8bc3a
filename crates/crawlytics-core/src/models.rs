//! Typed records produced by the parsers and the rollup documents persisted
//! for the dashboards. Field names of the serialized documents are the wire
//! contract with the document store.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// One crawl observation for a URL, either a successful page crawl or a crawl
/// error. Error observations carry zero speed and size.
#[derive(Debug, Clone, PartialEq)]
pub struct LogItem {
    pub url: String,
    pub timestamp: NaiveDateTime,
    pub page_load_speed: f64,
    pub page_size: u64,
    pub non_compliance_reason: Option<String>,
}

impl LogItem {
    /// A page-crawled event.
    pub fn crawled(
        url: impl Into<String>,
        timestamp: NaiveDateTime,
        page_load_speed: f64,
        page_size: u64,
    ) -> Self {
        Self {
            url: url.into(),
            timestamp,
            page_load_speed,
            page_size,
            non_compliance_reason: None,
        }
    }

    /// A page-crawl-error event.
    pub fn failed(
        url: impl Into<String>,
        timestamp: NaiveDateTime,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            timestamp,
            page_load_speed: 0.0,
            page_size: 0,
            non_compliance_reason: Some(reason.into()),
        }
    }

    pub fn compliant(&self) -> bool {
        self.non_compliance_reason.is_none()
    }
}

/// Daily row for a single URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    pub url: String,
    pub visit_count: u64,
    pub domain: String,
    pub page_load_speed: f64,
    pub page_size: u64,
    pub first_crawled_at: NaiveDateTime,
    pub last_crawled_at: NaiveDateTime,
    pub compliant: bool,
    pub non_compliance_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasonCount {
    pub reason: String,
    pub count: u64,
}

/// Daily row for a single domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainItem {
    pub date: NaiveDate,
    pub domain: String,
    pub page_count: u64,
    pub visit_count: u64,
    pub avg_page_load_speed: f64,
    pub total_page_size: u64,
    pub compliance_count: u64,
    pub non_compliance_count: u64,
    pub non_compliance_reasons: Vec<ReasonCount>,
}

/// Page counts bucketed by load speed: fast < 500ms, medium < 1500ms, slow otherwise.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeedHistogram {
    pub fast: u64,
    pub medium: u64,
    pub slow: u64,
}

impl SpeedHistogram {
    pub fn record(&mut self, page_load_speed: f64) {
        if page_load_speed < 500.0 {
            self.fast += 1;
        } else if page_load_speed < 1500.0 {
            self.medium += 1;
        } else {
            self.slow += 1;
        }
    }
}

/// Daily summary across every crawled domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewSummary {
    pub date: NaiveDate,
    pub page_count: u64,
    pub visit_count: u64,
    pub urls_per_domain_mean: f64,
    pub total_page_size: u64,
    pub compliance_count: u64,
    pub non_compliance_count: u64,
    pub crawl_frequency: f64,
    pub avg_page_load_speed: f64,
    pub page_load_speed_count: SpeedHistogram,
    pub non_compliance_reasons_count: Vec<ReasonCount>,
}

/// Recommendation engine scores logged for one search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecommendationScore {
    pub top1: f64,
    pub top10: f64,
    pub top50: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvertiserDashboardStat {
    pub date: NaiveDate,
    pub search_count: u64,
    pub top1_avg: f64,
    pub top10_avg: f64,
    pub top50_avg: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2021, 3, 12)
            .unwrap()
            .and_hms_opt(15, 49, 48)
            .unwrap()
    }

    #[test]
    fn test_compliance_follows_reason() {
        assert!(LogItem::crawled("https://a.com/", ts(), 1.5, 10).compliant());
        let failed = LogItem::failed("https://a.com/", ts(), "HttpError");
        assert!(!failed.compliant());
        assert_eq!(failed.page_load_speed, 0.0);
        assert_eq!(failed.page_size, 0);
    }

    #[test]
    fn test_speed_histogram_boundaries() {
        let mut histogram = SpeedHistogram::default();
        for speed in [0.0, 499.9, 500.0, 1499.9, 1500.0, 9000.0] {
            histogram.record(speed);
        }
        assert_eq!(
            histogram,
            SpeedHistogram {
                fast: 2,
                medium: 2,
                slow: 2
            }
        );
    }

    #[test]
    fn test_page_item_wire_fields() {
        let item = PageItem {
            url: "https://a.com/x".into(),
            visit_count: 2,
            domain: "a.com".into(),
            page_load_speed: 600.0,
            page_size: 500,
            first_crawled_at: ts(),
            last_crawled_at: ts(),
            compliant: true,
            non_compliance_reason: None,
        };
        let value = serde_json::to_value(&item).unwrap();
        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "compliant",
                "domain",
                "first_crawled_at",
                "last_crawled_at",
                "non_compliance_reason",
                "page_load_speed",
                "page_size",
                "url",
                "visit_count"
            ]
        );
    }
}
