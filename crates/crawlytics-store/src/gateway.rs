//! Rollup persistence on top of a [`DocumentStore`].
//!
//! Write operations never raise: a failed write is logged and reported as
//! `None`, so callers treat a missing acknowledgment as a failed batch.
//! Reads that decide whether work happens at all propagate their errors.

use std::sync::Arc;

use chrono::NaiveDate;
use crawlytics_core::{
    AdvertiserDashboardStat, BidRow, DomainItem, DomainUrlCount, IntentCount, OverviewSummary,
    PageItem, Pipeline, TaxonomyGroup,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, instrument};

use crate::document::{to_document, Document, Upsert, WriteAck};
use crate::error::{Result, StoreError};
use crate::store::DocumentStore;

pub const CRAWLED_PAGES: &str = "crawled_pages";
pub const CRAWLED_DOMAINS: &str = "crawled_domains";
pub const OVERVIEW: &str = "overview";
pub const ADVERTISER_DASHBOARD_STATS: &str = "advertiser_dashboard_stats";
pub const TAXONOMY_COUNT: &str = "taxonomy_count";
pub const INTENT_COUNT: &str = "intent_count";
pub const DOMAINS_DATA: &str = "domains_data";
pub const BIDSTREAM: &str = "bidstream";
pub const BIDSTREAM_DATEWISE: &str = "bidstream_datewise";
/// Documents written by the recommendation engine.
pub const RECOMMENDATIONS: &str = "data";

const UNIQUE_INDEXES: &[(&str, &[&str])] = &[
    (CRAWLED_PAGES, &["url", "domain"]),
    (CRAWLED_DOMAINS, &["domain", "date"]),
    (OVERVIEW, &["date"]),
    (ADVERTISER_DASHBOARD_STATS, &["date"]),
    (TAXONOMY_COUNT, &["date"]),
    (INTENT_COUNT, &["date"]),
    (DOMAINS_DATA, &["date"]),
    (BIDSTREAM_DATEWISE, &["ingested_on", "domain", "geo"]),
    (BIDSTREAM, &["domain"]),
];

const OVERVIEW_COUNTS: &[&str] = &[
    "page_count",
    "visit_count",
    "total_page_size",
    "compliance_count",
    "non_compliance_count",
];

const DOMAIN_COUNTS: &[&str] = &[
    "page_count",
    "total_page_size",
    "visit_count",
    "compliance_count",
    "non_compliance_count",
];

#[derive(Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn DocumentStore>,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Register the unique index of every rollup collection.
    pub async fn setup(&self) -> Result<()> {
        info!("setting up document store");
        for (collection, fields) in UNIQUE_INDEXES {
            self.store.ensure_unique_index(collection, fields).await?;
        }
        debug!(indexes = UNIQUE_INDEXES.len(), "document store setup completed");
        Ok(())
    }

    /// The stored overview for `date`, if the day has already been processed.
    pub async fn overview_for(&self, date: NaiveDate) -> Result<Option<OverviewSummary>> {
        self.store
            .find_one(OVERVIEW, &date_filter(date))
            .await?
            .map(|document| decode(OVERVIEW, document))
            .transpose()
    }

    #[instrument(skip(self, pages), fields(count = pages.len()))]
    pub async fn upsert_pages(&self, pages: &[PageItem]) -> Option<WriteAck> {
        let result = async {
            let upserts = pages
                .iter()
                .map(|page| {
                    let mut upsert = Upsert::keyed(encode(CRAWLED_PAGES, page)?, &["url", "domain"]);
                    move_field(&mut upsert.set, &mut upsert.inc, "visit_count");
                    move_field(&mut upsert.set, &mut upsert.set_on_insert, "first_crawled_at");
                    Ok(upsert)
                })
                .collect::<Result<Vec<_>>>()?;
            self.store.upsert_many(CRAWLED_PAGES, upserts).await
        }
        .await;
        acknowledge(CRAWLED_PAGES, result)
    }

    #[instrument(skip(self, domains), fields(count = domains.len()))]
    pub async fn upsert_domains(&self, domains: &[DomainItem]) -> Option<WriteAck> {
        let result = async {
            let upserts = domains
                .iter()
                .map(|domain| {
                    let mut upsert =
                        Upsert::keyed(encode(CRAWLED_DOMAINS, domain)?, &["date", "domain"]);
                    for field in DOMAIN_COUNTS {
                        move_field(&mut upsert.set, &mut upsert.inc, field);
                    }
                    move_field(&mut upsert.set, &mut upsert.push, "non_compliance_reasons");
                    Ok(upsert)
                })
                .collect::<Result<Vec<_>>>()?;
            self.store.upsert_many(CRAWLED_DOMAINS, upserts).await
        }
        .await;
        acknowledge(CRAWLED_DOMAINS, result)
    }

    /// Insert the day's overview, or merge it into the stored one: counts
    /// and speed buckets add up, the crawl frequency keeps its maximum,
    /// averages become the mean of the stored and new values and reason
    /// counts are appended.
    #[instrument(skip(self, overview), fields(date = %overview.date))]
    pub async fn create_or_update_overview(
        &self,
        overview: &OverviewSummary,
    ) -> Option<WriteAck> {
        let result = async {
            let document = encode(OVERVIEW, overview)?;
            let Some(stored) = self.overview_for(overview.date).await? else {
                return self.store.insert_one(OVERVIEW, document).await;
            };

            let mut upsert = Upsert::new(date_filter(overview.date));
            for field in OVERVIEW_COUNTS {
                if let Some(value) = document.get(*field) {
                    upsert.inc.insert(field.to_string(), value.clone());
                }
            }
            let histogram = overview.page_load_speed_count;
            upsert = upsert
                .inc("page_load_speed_count.fast", histogram.fast)
                .inc("page_load_speed_count.medium", histogram.medium)
                .inc("page_load_speed_count.slow", histogram.slow)
                .max("crawl_frequency", overview.crawl_frequency)
                .set(
                    "avg_page_load_speed",
                    (overview.avg_page_load_speed + stored.avg_page_load_speed) / 2.0,
                )
                .set(
                    "urls_per_domain_mean",
                    (overview.urls_per_domain_mean + stored.urls_per_domain_mean) / 2.0,
                );
            if let Some(Value::Array(reasons)) = document.get("non_compliance_reasons_count") {
                upsert = upsert.push_each("non_compliance_reasons_count", reasons.clone());
            }
            self.store.upsert_many(OVERVIEW, vec![upsert]).await
        }
        .await;
        acknowledge(OVERVIEW, result)
    }

    pub async fn upsert_advertiser_stats(
        &self,
        stats: &AdvertiserDashboardStat,
    ) -> Option<WriteAck> {
        let result = async {
            let upsert = Upsert::keyed(encode(ADVERTISER_DASHBOARD_STATS, stats)?, &["date"]);
            self.store
                .upsert_many(ADVERTISER_DASHBOARD_STATS, vec![upsert])
                .await
        }
        .await;
        acknowledge(ADVERTISER_DASHBOARD_STATS, result)
    }

    /// One upsert per bid key; every field of an existing row is replaced.
    #[instrument(skip(self, rows), fields(count = rows.len()))]
    pub async fn upsert_bid_rows(&self, rows: &[BidRow]) -> Option<WriteAck> {
        let result = async {
            let upserts = rows
                .iter()
                .map(|row| {
                    Ok(Upsert::keyed(
                        encode(BIDSTREAM_DATEWISE, row)?,
                        &["ingested_on", "domain", "geo"],
                    ))
                })
                .collect::<Result<Vec<_>>>()?;
            self.store.upsert_many(BIDSTREAM_DATEWISE, upserts).await
        }
        .await;
        acknowledge(BIDSTREAM_DATEWISE, result)
    }

    /// Rebuild the per-domain bid summaries from rows ingested since `since`.
    #[instrument(skip(self))]
    pub async fn compact_bid_rows(&self, since: NaiveDate, top_geos: usize) -> Result<WriteAck> {
        let summaries = self
            .store
            .run_aggregation(BIDSTREAM_DATEWISE, &Pipeline::BidSummary { since, top_geos })
            .await?;
        let ack = self.store.replace_all(BIDSTREAM, summaries).await?;
        info!(domains = ack.inserted, "compacted bid rows");
        Ok(ack)
    }

    /// Upsert a dated report into `collection`, replacing the day's fields.
    pub async fn upsert_report<T: Serialize>(
        &self,
        collection: &str,
        report: &T,
    ) -> Option<WriteAck> {
        let result = async {
            let upsert = Upsert::keyed(encode(collection, report)?, &["date"]);
            self.store.upsert_many(collection, vec![upsert]).await
        }
        .await;
        acknowledge(collection, result)
    }

    pub async fn taxonomy_groups(&self) -> Result<Vec<TaxonomyGroup>> {
        self.aggregate(&Pipeline::TaxonomyCount).await
    }

    pub async fn intent_counts(&self) -> Result<Vec<IntentCount>> {
        self.aggregate(&Pipeline::IntentCount).await
    }

    pub async fn urls_per_domain(&self) -> Result<Vec<DomainUrlCount>> {
        self.aggregate(&Pipeline::UrlsPerDomain).await
    }

    async fn aggregate<T: DeserializeOwned>(&self, pipeline: &Pipeline) -> Result<Vec<T>> {
        self.store
            .run_aggregation(RECOMMENDATIONS, pipeline)
            .await?
            .into_iter()
            .map(|document| decode(RECOMMENDATIONS, document))
            .collect()
    }
}

fn date_filter(date: NaiveDate) -> Document {
    let mut filter = Map::new();
    filter.insert("date".to_string(), json!(date));
    filter
}

fn encode<T: Serialize>(collection: &str, value: &T) -> Result<Document> {
    to_document(value).map_err(|e| StoreError::write_failure(collection, e.to_string()))
}

fn decode<T: DeserializeOwned>(collection: &str, document: Document) -> Result<T> {
    serde_json::from_value(Value::Object(document))
        .map_err(|e| StoreError::corrupt(collection, e.to_string()))
}

fn move_field(from: &mut Document, to: &mut Document, field: &str) {
    if let Some(value) = from.remove(field) {
        to.insert(field.to_string(), value);
    }
}

fn acknowledge(collection: &str, result: Result<WriteAck>) -> Option<WriteAck> {
    match result {
        Ok(ack) => {
            debug!(
                collection,
                inserted = ack.inserted,
                updated = ack.updated,
                "write acknowledged"
            );
            Some(ack)
        }
        Err(err) => {
            error!(collection, code = err.code(), error = %err, "write failed");
            None
        }
    }
}
