// crawlytics-core - log-line parsing and rollup aggregation
//
// Pure, synchronous building blocks shared by the daily batch runner and the
// bid-stream pipeline. The only I/O here is lazy reading of local log files.

pub mod aggregate;
pub mod bid;
pub mod error;
pub mod event;
pub mod lines;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod reports;
pub mod summarize;

pub use aggregate::{
    build_advertiser_stats, build_domain_items, build_overview, build_page_items, domain_of, mean,
};
pub use bid::{
    parse_bid_event, summarize_bid_rows, BidObservation, BidRecordAggregate, BidRecordKey, BidRow,
    BidSkip, BidSummary,
};
pub use error::{AggregateError, InputError, ParseError, SummaryError};
pub use event::RawEvent;
pub use lines::{log_file_path, parse_date, LineSource, LogLevel, LogPathError, DATE_FORMAT};
pub use models::{
    AdvertiserDashboardStat, DomainItem, LogItem, OverviewSummary, PageItem, ReasonCount,
    RecommendationScore, SpeedHistogram,
};
pub use parse::{
    is_line_kind, parse_crawl_frequency, parse_page_crawl_error, parse_page_crawled,
    parse_recommendation_score, LineKind,
};
pub use pipeline::{to_document, Document, Pipeline, PipelineError};
pub use reports::{
    build_intent_report, build_taxonomy_report, build_urls_per_domain_report, DomainUrlCount,
    IntentCount, IntentReport, LanguageCount, TaxonomyCategory, TaxonomyGroup, TaxonomyReport,
    UrlsPerDomainReport,
};
pub use summarize::{
    summarize_errors, summarize_frequency, summarize_info, summarize_recommendations,
};
