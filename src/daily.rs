//! Daily crawler-log rollup: pages, domains, overview and advertiser stats
//! for one date.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use crawlytics_core::{
    build_advertiser_stats, build_domain_items, build_overview, build_page_items, log_file_path,
    summarize_errors, summarize_frequency, summarize_info, summarize_recommendations, LineSource,
    LogLevel, DATE_FORMAT,
};
use crawlytics_source::{collect_lines, LogSource, TimeWindow};
use crawlytics_store::{PersistenceGateway, WriteAck};
use tracing::{info, instrument, warn};

/// CloudWatch filter patterns for each kind of line.
pub const INFO_FILTER: &str = "INFO PAGE_CRAWLED";
pub const FREQUENCY_FILTER: &str = "INFO Crawled";
pub const ERROR_FILTER: &str = "ERROR PAGE_CRAWL_ERROR";
pub const RECOMMENDATION_FILTER: &str = "INFO recommendation_engine";

/// Where the day's log lines come from.
#[derive(Debug, Clone)]
pub enum DailyInput {
    /// A directory holding `info.log.<date>` and `error.log.<date>`.
    Local { logs_path: PathBuf },
    /// Lines already fetched from a log service.
    Fetched(DailyLines),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyLines {
    pub info: Vec<String>,
    pub frequency: Vec<String>,
    pub error: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DailyOutcome {
    /// An overview already exists for the date; nothing was written.
    Skipped,
    /// No page was crawled that day.
    NoLogs { advertiser: Option<WriteAck> },
    Completed(DailySummary),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DailySummary {
    pub pages: usize,
    pub domains: usize,
    pub advertiser: Option<WriteAck>,
    pub pages_ack: Option<WriteAck>,
    pub domains_ack: Option<WriteAck>,
    pub overview_ack: Option<WriteAck>,
}

struct DailySources {
    info: LineSource,
    frequency: LineSource,
    error: LineSource,
    recommendations: LineSource,
}

impl DailySources {
    fn open(input: DailyInput, date: NaiveDate) -> Result<Self> {
        match input {
            DailyInput::Local { logs_path } => {
                let date = date.format(DATE_FORMAT).to_string();
                let info_path = log_file_path(&date, &logs_path, LogLevel::Info)
                    .context("info log file unavailable")?;
                let error_path = log_file_path(&date, &logs_path, LogLevel::Error)
                    .context("error log file unavailable")?;
                Ok(Self {
                    info: LineSource::file(&info_path),
                    frequency: LineSource::file(&info_path),
                    error: LineSource::file(error_path),
                    recommendations: LineSource::lines(Vec::<String>::new()),
                })
            }
            DailyInput::Fetched(lines) => Ok(Self {
                info: LineSource::lines(lines.info),
                frequency: LineSource::lines(lines.frequency),
                error: LineSource::lines(lines.error),
                recommendations: LineSource::lines(lines.recommendations),
            }),
        }
    }
}

/// Roll up one day of crawler logs.
///
/// A day whose overview is already stored is skipped before any input is
/// read. Store writes that fail are logged by the gateway and show up as
/// `None` acknowledgments in the summary.
#[instrument(skip(gateway, input))]
pub async fn run_daily(
    gateway: &PersistenceGateway,
    input: DailyInput,
    date: NaiveDate,
) -> Result<DailyOutcome> {
    if gateway
        .overview_for(date)
        .await
        .context("failed to look up the day's overview")?
        .is_some()
    {
        info!(%date, "overview document already exists");
        return Ok(DailyOutcome::Skipped);
    }

    let sources = DailySources::open(input, date)?;

    let crawled = summarize_info(&sources.info).context("failed to summarize info logs")?;
    let frequencies =
        summarize_frequency(&sources.frequency).context("failed to summarize crawl stats")?;
    let errors = summarize_errors(&sources.error).context("failed to summarize error logs")?;
    let scores = summarize_recommendations(&sources.recommendations)
        .context("failed to summarize recommendation logs")?;
    info!(
        crawled = crawled.len(),
        errors = errors.len(),
        frequency_buckets = frequencies.len(),
        searches = scores.len(),
        "summarized logs"
    );

    let mut events = crawled;
    events.extend(errors);
    let page_items = build_page_items(&events);

    let advertiser = match build_advertiser_stats(&scores, date) {
        Some(stats) => gateway.upsert_advertiser_stats(&stats).await,
        None => None,
    };

    if page_items.is_empty() {
        info!(%date, "no logs found");
        return Ok(DailyOutcome::NoLogs { advertiser });
    }

    let pages_ack = gateway.upsert_pages(&page_items).await;

    let domain_items = build_domain_items(&page_items, date)?;
    let domains_ack = gateway.upsert_domains(&domain_items).await;

    let overview = build_overview(&domain_items, &page_items, &frequencies, date)
        .context("failed to build the overview")?;
    let overview_ack = gateway.create_or_update_overview(&overview).await;

    if pages_ack.is_none() || domains_ack.is_none() || overview_ack.is_none() {
        warn!(%date, "some rollups were not acknowledged by the store");
    }

    Ok(DailyOutcome::Completed(DailySummary {
        pages: page_items.len(),
        domains: domain_items.len(),
        advertiser,
        pages_ack,
        domains_ack,
        overview_ack,
    }))
}

/// Fetch the day's crawler lines (and recommendation lines, when an
/// advertiser source is given), following every page of each filter. Each
/// page must arrive within `fetch_timeout`.
pub async fn fetch_daily_lines(
    crawler: &dyn LogSource,
    advertiser: Option<&dyn LogSource>,
    date: NaiveDate,
    fetch_timeout: Duration,
) -> Result<DailyLines> {
    let window = TimeWindow::for_day(date);
    info!(source = crawler.name(), %date, "fetching crawler logs");

    let info = collect_lines(crawler, &window, Some(INFO_FILTER), fetch_timeout).await?;
    let frequency = collect_lines(crawler, &window, Some(FREQUENCY_FILTER), fetch_timeout).await?;
    let error = collect_lines(crawler, &window, Some(ERROR_FILTER), fetch_timeout).await?;
    let recommendations = match advertiser {
        Some(source) => {
            collect_lines(source, &window, Some(RECOMMENDATION_FILTER), fetch_timeout).await?
        }
        None => Vec::new(),
    };

    Ok(DailyLines {
        info,
        frequency,
        error,
        recommendations,
    })
}
