//! Fold crawl observations into daily page, domain and overview rollups.

use chrono::NaiveDate;
use url::Url;

use crate::error::AggregateError;
use crate::models::{
    AdvertiserDashboardStat, DomainItem, LogItem, OverviewSummary, PageItem, ReasonCount,
    RecommendationScore, SpeedHistogram,
};

/// Arithmetic mean; an empty input is an error rather than zero.
pub fn mean<I>(values: I, field: &'static str) -> Result<f64, AggregateError>
where
    I: IntoIterator<Item = f64>,
{
    let (sum, count) = values
        .into_iter()
        .fold((0.0, 0usize), |(sum, count), value| (sum + value, count + 1));
    if count == 0 {
        return Err(AggregateError::EmptyMean { field });
    }
    Ok(sum / count as f64)
}

/// Authority of a URL exactly as written (case, port and userinfo kept), or
/// an empty string when the URL does not parse or has no host.
pub fn domain_of(url: &str) -> String {
    if !Url::parse(url).is_ok_and(|parsed| parsed.has_host()) {
        return String::new();
    }
    url.split_once("://")
        .and_then(|(_, rest)| rest.split(['/', '?', '#']).next())
        .unwrap_or_default()
        .to_string()
}

/// Split a slice into runs of consecutive elements that `same` considers equal.
fn runs<T, F>(items: &[T], same: F) -> Vec<&[T]>
where
    F: Fn(&T, &T) -> bool,
{
    let mut groups = Vec::new();
    let mut start = 0;
    for index in 1..=items.len() {
        if index == items.len() || !same(&items[start], &items[index]) {
            if start < index {
                groups.push(&items[start..index]);
            }
            start = index;
        }
    }
    groups
}

/// First earliest and first latest observation of a non-empty group.
fn first_and_last<'a>(group: &[&'a LogItem]) -> Option<(&'a LogItem, &'a LogItem)> {
    let (&head, rest) = group.split_first()?;
    let mut first = head;
    let mut last = head;
    for &item in rest {
        if item.timestamp < first.timestamp {
            first = item;
        }
        if item.timestamp > last.timestamp {
            last = item;
        }
    }
    Some((first, last))
}

/// One row per distinct URL.
///
/// Events are stable-sorted by URL first, so input order only matters as
/// the tie-break between observations with equal timestamps.
pub fn build_page_items(events: &[LogItem]) -> Vec<PageItem> {
    let mut sorted: Vec<&LogItem> = events.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url));

    runs(&sorted, |a, b| a.url == b.url)
        .into_iter()
        .filter_map(|group| {
            let (first, last) = first_and_last(group)?;
            Some(PageItem {
                url: last.url.clone(),
                visit_count: group.len() as u64,
                domain: domain_of(&last.url),
                page_load_speed: last.page_load_speed,
                page_size: last.page_size,
                first_crawled_at: first.timestamp,
                last_crawled_at: last.timestamp,
                compliant: last.compliant(),
                non_compliance_reason: last.non_compliance_reason.clone(),
            })
        })
        .collect()
}

/// Count non-compliant pages per reason, sorted by reason.
fn reason_counts(pages: &[&PageItem]) -> Vec<ReasonCount> {
    let mut reasons: Vec<&str> = pages
        .iter()
        .filter(|page| !page.compliant)
        .map(|page| page.non_compliance_reason.as_deref().unwrap_or_default())
        .collect();
    reasons.sort();

    runs(&reasons, |a, b| a == b)
        .into_iter()
        .map(|group| ReasonCount {
            reason: group[0].to_string(),
            count: group.len() as u64,
        })
        .collect()
}

/// One row per domain, sorted by domain.
pub fn build_domain_items(
    page_items: &[PageItem],
    date: NaiveDate,
) -> Result<Vec<DomainItem>, AggregateError> {
    let mut sorted: Vec<&PageItem> = page_items.iter().collect();
    sorted.sort_by(|a, b| a.domain.cmp(&b.domain));

    runs(&sorted, |a, b| a.domain == b.domain)
        .into_iter()
        .map(|group| {
            let compliance_count = group.iter().filter(|page| page.compliant).count() as u64;
            Ok(DomainItem {
                date,
                domain: group[0].domain.clone(),
                page_count: group.len() as u64,
                visit_count: group.iter().map(|page| page.visit_count).sum(),
                avg_page_load_speed: mean(
                    group.iter().map(|page| page.page_load_speed),
                    "avg_page_load_speed",
                )?,
                total_page_size: group.iter().map(|page| page.page_size).sum(),
                compliance_count,
                non_compliance_count: group.len() as u64 - compliance_count,
                non_compliance_reasons: reason_counts(group),
            })
        })
        .collect()
}

/// Daily overview across all domains.
///
/// Fails when there are no domains or no crawl-frequency samples.
pub fn build_overview(
    domain_items: &[DomainItem],
    page_items: &[PageItem],
    crawl_frequencies: &[u64],
    date: NaiveDate,
) -> Result<OverviewSummary, AggregateError> {
    let urls_per_domain_mean = mean(
        domain_items.iter().map(|domain| domain.page_count as f64),
        "urls_per_domain_mean",
    )?;
    let crawl_frequency = mean(
        crawl_frequencies.iter().map(|&freq| freq as f64),
        "crawl_frequency",
    )?;

    let page_count: u64 = domain_items.iter().map(|domain| domain.page_count).sum();
    let weighted_speed: f64 = domain_items
        .iter()
        .map(|domain| domain.page_count as f64 * domain.avg_page_load_speed)
        .sum();
    let avg_page_load_speed = if page_count > 0 {
        weighted_speed / page_count as f64
    } else {
        0.0
    };

    let mut page_load_speed_count = SpeedHistogram::default();
    for page in page_items {
        page_load_speed_count.record(page.page_load_speed);
    }

    let non_compliance_count: u64 = domain_items
        .iter()
        .map(|domain| domain.non_compliance_count)
        .sum();

    let mut non_compliance_reasons_count = Vec::new();
    if non_compliance_count > 0 {
        let mut reasons: Vec<&ReasonCount> = domain_items
            .iter()
            .flat_map(|domain| domain.non_compliance_reasons.iter())
            .collect();
        reasons.sort_by(|a, b| a.reason.cmp(&b.reason));
        non_compliance_reasons_count = runs(&reasons, |a, b| a.reason == b.reason)
            .into_iter()
            .map(|group| ReasonCount {
                reason: group[0].reason.clone(),
                count: group.iter().map(|reason| reason.count).sum(),
            })
            .collect();
    }

    Ok(OverviewSummary {
        date,
        page_count,
        visit_count: domain_items.iter().map(|domain| domain.visit_count).sum(),
        urls_per_domain_mean,
        total_page_size: domain_items.iter().map(|domain| domain.total_page_size).sum(),
        compliance_count: domain_items
            .iter()
            .map(|domain| domain.compliance_count)
            .sum(),
        non_compliance_count,
        crawl_frequency,
        avg_page_load_speed,
        page_load_speed_count,
        non_compliance_reasons_count,
    })
}

/// Averages of recommendation scores for the day, `None` without searches.
pub fn build_advertiser_stats(
    scores: &[RecommendationScore],
    date: NaiveDate,
) -> Option<AdvertiserDashboardStat> {
    if scores.is_empty() {
        return None;
    }
    let count = scores.len() as f64;
    let sum = |pick: fn(&RecommendationScore) -> f64| scores.iter().map(pick).sum::<f64>();
    Some(AdvertiserDashboardStat {
        date,
        search_count: scores.len() as u64,
        top1_avg: sum(|score| score.top1) / count,
        top10_avg: sum(|score| score.top10) / count,
        top50_avg: sum(|score| score.top50) / count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDateTime;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 12).unwrap()
    }

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        date().and_hms_opt(hour, minute, 0).unwrap()
    }

    fn page(url: &str, speed: f64, compliant: bool, reason: Option<&str>) -> PageItem {
        PageItem {
            url: url.to_string(),
            visit_count: 1,
            domain: domain_of(url),
            page_load_speed: speed,
            page_size: 100,
            first_crawled_at: at(10, 0),
            last_crawled_at: at(10, 0),
            compliant,
            non_compliance_reason: reason.map(str::to_string),
        }
    }

    fn domain(name: &str, page_count: u64, avg_page_load_speed: f64) -> DomainItem {
        DomainItem {
            date: date(),
            domain: name.to_string(),
            page_count,
            visit_count: page_count,
            avg_page_load_speed,
            total_page_size: page_count * 100,
            compliance_count: page_count,
            non_compliance_count: 0,
            non_compliance_reasons: vec![],
        }
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.example.com/a?b=c"), "www.example.com");
        assert_eq!(domain_of("http://localhost:8080/x"), "localhost:8080");
        assert_eq!(domain_of("not a url"), "");
        assert_eq!(domain_of("mailto:someone@a.com"), "");
    }

    #[test]
    fn test_domain_of_keeps_authority_as_written() {
        assert_eq!(domain_of("https://WWW.Example.com/x"), "WWW.Example.com");
        assert_eq!(domain_of("http://a.com:80/x"), "a.com:80");
        assert_eq!(domain_of("https://user@a.com/x"), "user@a.com");
        assert_eq!(domain_of("https://a.com?q=1"), "a.com");
        assert_eq!(domain_of("https://a.com#top"), "a.com");
    }

    #[test]
    fn test_page_item_takes_latest_observation() {
        let events = vec![
            LogItem::crawled("https://a.com/x", at(10, 0), 500.0, 10),
            LogItem::crawled("https://a.com/x", at(11, 0), 600.0, 20),
        ];
        let items = build_page_items(&events);
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.visit_count, 2);
        assert_eq!(item.page_load_speed, 600.0);
        assert_eq!(item.page_size, 20);
        assert_eq!(item.first_crawled_at, at(10, 0));
        assert_eq!(item.last_crawled_at, at(11, 0));
        assert!(item.compliant);
        assert_eq!(item.domain, "a.com");
    }

    #[test]
    fn test_page_items_group_non_contiguous_urls() {
        let events = vec![
            LogItem::crawled("https://b.com/1", at(10, 0), 100.0, 1),
            LogItem::crawled("https://a.com/1", at(10, 5), 200.0, 1),
            LogItem::failed("https://b.com/1", at(12, 0), "HttpError"),
        ];
        let items = build_page_items(&events);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].url, "https://a.com/1");
        assert_eq!(items[1].visit_count, 2);
        assert!(!items[1].compliant);
        assert_eq!(items[1].non_compliance_reason.as_deref(), Some("HttpError"));
        assert_eq!(items[1].page_load_speed, 0.0);
    }

    #[test]
    fn test_page_item_ties_keep_first_in_input_order() {
        let events = vec![
            LogItem::crawled("https://a.com/x", at(10, 0), 300.0, 1),
            LogItem::crawled("https://a.com/x", at(10, 0), 900.0, 2),
        ];
        let items = build_page_items(&events);
        assert_eq!(items[0].page_load_speed, 300.0);
    }

    #[test]
    fn test_domain_items_are_independent() {
        let pages = vec![
            page("https://a.com/1", 100.0, true, None),
            page("https://b.com/1", 1000.0, true, None),
            page("https://a.com/2", 300.0, true, None),
            page("https://b.com/2", 2000.0, true, None),
        ];
        let domains = build_domain_items(&pages, date()).unwrap();
        assert_eq!(domains.len(), 2);
        assert_eq!(domains[0].domain, "a.com");
        assert_eq!(domains[0].page_count, 2);
        assert_eq!(domains[0].visit_count, 2);
        assert_eq!(domains[0].avg_page_load_speed, 200.0);
        assert_eq!(domains[1].avg_page_load_speed, 1500.0);

        let mut changed = pages.clone();
        changed[1].page_load_speed = 5000.0;
        let after = build_domain_items(&changed, date()).unwrap();
        assert_eq!(after[0], domains[0]);
        assert_ne!(after[1], domains[1]);
    }

    #[test]
    fn test_domain_reason_counts() {
        let pages = vec![
            page("https://a.com/1", 100.0, true, None),
            page("https://a.com/2", 0.0, false, Some("HttpError")),
            page("https://a.com/3", 300.0, true, None),
        ];
        let domains = build_domain_items(&pages, date()).unwrap();
        assert_eq!(
            domains[0].non_compliance_reasons,
            vec![ReasonCount {
                reason: "HttpError".into(),
                count: 1
            }]
        );
        assert_eq!(domains[0].compliance_count, 2);
        assert_eq!(domains[0].non_compliance_count, 1);
    }

    #[test]
    fn test_overview_weighted_average() {
        let domains = vec![domain("a.com", 2, 550.0), domain("b.com", 3, 533.3333333333334)];
        let pages = vec![
            page("https://a.com/1", 100.0, true, None),
            page("https://a.com/2", 1000.0, true, None),
            page("https://b.com/1", 499.0, true, None),
            page("https://b.com/2", 500.0, true, None),
            page("https://b.com/3", 1500.0, true, None),
        ];
        let overview = build_overview(&domains, &pages, &[200, 300], date()).unwrap();
        assert_eq!(
            overview.avg_page_load_speed,
            (2.0 * 550.0 + 3.0 * 533.3333333333334) / 5.0
        );
        assert_eq!(overview.page_count, 5);
        assert_eq!(overview.urls_per_domain_mean, 2.5);
        assert_eq!(overview.crawl_frequency, 250.0);
        assert_eq!(
            overview.page_load_speed_count,
            SpeedHistogram {
                fast: 2,
                medium: 2,
                slow: 1
            }
        );
        assert!(overview.non_compliance_reasons_count.is_empty());
    }

    #[test]
    fn test_overview_merges_reasons_across_domains() {
        let mut a = domain("a.com", 2, 100.0);
        a.non_compliance_count = 2;
        a.non_compliance_reasons = vec![
            ReasonCount {
                reason: "Timeout".into(),
                count: 1,
            },
            ReasonCount {
                reason: "HttpError".into(),
                count: 1,
            },
        ];
        let mut b = domain("b.com", 1, 100.0);
        b.non_compliance_count = 1;
        b.non_compliance_reasons = vec![ReasonCount {
            reason: "Timeout".into(),
            count: 1,
        }];

        let overview = build_overview(&[a, b], &[], &[1], date()).unwrap();
        assert_eq!(overview.non_compliance_count, 3);
        assert_eq!(
            overview.non_compliance_reasons_count,
            vec![
                ReasonCount {
                    reason: "HttpError".into(),
                    count: 1
                },
                ReasonCount {
                    reason: "Timeout".into(),
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn test_overview_without_domains_fails() {
        assert_eq!(
            build_overview(&[], &[], &[10], date()),
            Err(AggregateError::EmptyMean {
                field: "urls_per_domain_mean"
            })
        );
        assert_eq!(
            build_overview(&[domain("a.com", 1, 1.0)], &[], &[], date()),
            Err(AggregateError::EmptyMean {
                field: "crawl_frequency"
            })
        );
    }

    #[test]
    fn test_advertiser_stats() {
        assert_eq!(build_advertiser_stats(&[], date()), None);
        let scores = vec![
            RecommendationScore {
                top1: 1.0,
                top10: 0.5,
                top50: 0.0,
            },
            RecommendationScore {
                top1: 0.0,
                top10: 0.5,
                top50: 1.0,
            },
        ];
        let stats = build_advertiser_stats(&scores, date()).unwrap();
        assert_eq!(stats.search_count, 2);
        assert_eq!(stats.top1_avg, 0.5);
        assert_eq!(stats.top10_avg, 0.5);
        assert_eq!(stats.top50_avg, 0.5);
    }
}
