use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use crawlytics::{DailyInput, DailyOutcome};
use crawlytics_config::RuntimeConfig;
use crawlytics_core::parse_date;
use crawlytics_source::{LogSource, StaticLogSource};
use tracing::info;

/// Daily crawler-log and bid-stream rollups for analytics dashboards
#[derive(Parser)]
#[command(name = "crawlytics")]
#[command(version)]
#[command(about = "Daily crawler-log and bid-stream rollups for analytics dashboards", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Roll up a day of local crawler log files
    Local {
        /// Directory holding info.log.<date> and error.log.<date>
        #[arg(long, value_name = "DIR")]
        logs_path: Option<PathBuf>,

        /// Day to process (defaults to yesterday)
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Roll up a day of crawler logs stored in CloudWatch Logs
    Cloudwatch {
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Crawler log group (overrides config)
        #[arg(long, value_name = "NAME")]
        log_group: Option<String>,

        /// Recommendation engine log group (overrides config)
        #[arg(long, value_name = "NAME")]
        adv_log_group: Option<String>,

        #[arg(long, value_name = "REGION")]
        region: Option<String>,
    },
    /// Aggregate a day of bid-request events
    Bidstream {
        #[arg(long, value_name = "YYYY-MM-DD", value_parser = parse_date)]
        date: Option<NaiveDate>,

        /// Bid-stream log group (overrides config)
        #[arg(long, value_name = "NAME")]
        log_group: Option<String>,

        /// Read events from a JSON-lines export instead of CloudWatch
        #[arg(long, value_name = "JSONL")]
        events_file: Option<PathBuf>,

        /// Rolling window of the per-domain summary; 0 disables it
        #[arg(long, value_name = "N")]
        aggregate_days: Option<u32>,
    },
    /// Rebuild the taxonomy, intent and urls-per-domain reports
    Reports,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build tokio runtime")?
        .block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let mut config = match &cli.config {
        Some(path) => RuntimeConfig::load_from_path(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => RuntimeConfig::load().context("Failed to load configuration")?,
    };

    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }

    crawlytics::init_tracing(&config);
    let gateway = crawlytics::init_gateway(&config).await?;

    match cli.command {
        Commands::Local { logs_path, date } => {
            let logs_path = logs_path
                .or_else(|| config.logs.path.as_ref().map(PathBuf::from))
                .context("--logs-path is required (or set logs.path in the config)")?;
            let date = date.unwrap_or_else(yesterday);
            info!(%date, logs_path = %logs_path.display(), "running in local mode");
            let outcome = crawlytics::run_daily(&gateway, DailyInput::Local { logs_path }, date).await?;
            report_daily(date, &outcome);
        }
        Commands::Cloudwatch {
            date,
            log_group,
            adv_log_group,
            region,
        } => {
            if let Some(region) = region {
                config.cloudwatch.region = Some(region);
            }
            let date = date.unwrap_or_else(yesterday);
            let log_group = log_group
                .or_else(|| config.cloudwatch.log_group.clone())
                .context("--log-group is required (or set cloudwatch.log_group)")?;
            let adv_log_group = adv_log_group.or_else(|| config.cloudwatch.adv_log_group.clone());
            info!(%date, log_group = %log_group, "running in cloudwatch mode");

            let crawler = cloudwatch_source(&config, log_group).await?;
            let advertiser = match adv_log_group {
                Some(group) => Some(cloudwatch_source(&config, group).await?),
                None => None,
            };
            let lines =
                crawlytics::fetch_daily_lines(
                    crawler.as_ref(),
                    advertiser.as_deref(),
                    date,
                    config.cloudwatch.fetch_timeout(),
                )
                .await
                .context("Failed to fetch crawler logs")?;
            let outcome = crawlytics::run_daily(&gateway, DailyInput::Fetched(lines), date).await?;
            report_daily(date, &outcome);
        }
        Commands::Bidstream {
            date,
            log_group,
            events_file,
            aggregate_days,
        } => {
            if let Some(days) = aggregate_days {
                config.bidstream.aggregate_days = days;
            }
            let date = date.unwrap_or_else(yesterday);
            let source: Arc<dyn LogSource> = match events_file {
                Some(path) => Arc::new(
                    StaticLogSource::from_jsonl(&path, config.cloudwatch.page_limit as usize)
                        .with_context(|| format!("Failed to load events from {}", path.display()))?,
                ),
                None => {
                    let group = log_group
                        .or_else(|| config.cloudwatch.bidstream_log_group.clone())
                        .context(
                            "--log-group or --events-file is required (or set cloudwatch.bidstream_log_group)",
                        )?;
                    cloudwatch_source(&config, group).await?
                }
            };
            let report = crawlytics::run_bidstream(&gateway, source, &config.bidstream, date).await?;
            info!(
                %date,
                bids = report.bids,
                keys = report.keys,
                flushed = report.flushed.is_some(),
                "bid-stream rollup finished"
            );
        }
        Commands::Reports => {
            let today = chrono::Utc::now().date_naive();
            let summary = crawlytics::run_reports(&gateway, today).await?;
            info!(
                taxonomy = summary.taxonomy.is_some(),
                intent = summary.intent.is_some(),
                urls_per_domain = summary.urls_per_domain.is_some(),
                "reports written"
            );
        }
    }

    Ok(())
}

fn yesterday() -> NaiveDate {
    let today = chrono::Local::now().date_naive();
    today.pred_opt().unwrap_or(today)
}

fn report_daily(date: NaiveDate, outcome: &DailyOutcome) {
    match outcome {
        DailyOutcome::Skipped => info!(%date, "day already processed"),
        DailyOutcome::NoLogs { .. } => info!(%date, "no crawler logs for the day"),
        DailyOutcome::Completed(summary) => info!(
            %date,
            pages = summary.pages,
            domains = summary.domains,
            "daily rollup finished"
        ),
    }
}

#[cfg(feature = "cloudwatch")]
async fn cloudwatch_source(config: &RuntimeConfig, log_group: String) -> Result<Arc<dyn LogSource>> {
    let source =
        crawlytics_source::CloudWatchLogSource::from_config(&config.cloudwatch, log_group).await;
    Ok(Arc::new(source))
}

#[cfg(not(feature = "cloudwatch"))]
async fn cloudwatch_source(_config: &RuntimeConfig, log_group: String) -> Result<Arc<dyn LogSource>> {
    anyhow::bail!(
        "cannot read log group '{}': built without the `cloudwatch` feature",
        log_group
    )
}
