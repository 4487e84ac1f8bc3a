// crawlytics - Daily crawler-log and bid-stream rollups
//
// Runners behind the `crawlytics` binary:
// - daily: crawler logs (local files or CloudWatch) -> pages, domains, overview
// - bidstream: bid-request events -> per (day, domain, geo) rows + summaries
// - reports: recommendation-engine documents -> taxonomy/intent/domain counts

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use crawlytics_bidstream::{BidRunReport, BidStreamAggregator};
use crawlytics_config::BidstreamConfig;
use crawlytics_source::LogSource;
use crawlytics_store::PersistenceGateway;

mod daily;
mod init;
mod reports;

pub use daily::{
    fetch_daily_lines, run_daily, DailyInput, DailyLines, DailyOutcome, DailySummary,
    ERROR_FILTER, FREQUENCY_FILTER, INFO_FILTER, RECOMMENDATION_FILTER,
};
pub use init::{init_gateway, init_tracing};
pub use reports::{run_reports, ReportsSummary};

/// Aggregate one day of bid-request events from `source`.
pub async fn run_bidstream(
    gateway: &PersistenceGateway,
    source: Arc<dyn LogSource>,
    config: &BidstreamConfig,
    date: NaiveDate,
) -> Result<BidRunReport> {
    BidStreamAggregator::new(source, gateway.clone(), config.clone())
        .run(date)
        .await
}
