//! One bid-stream run: a producer pages through the day's events into a
//! bounded queue, consumers fold them into a [`BidAccumulator`], then the
//! aggregates are flushed and optionally compacted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Days, NaiveDate};
use crawlytics_config::BidstreamConfig;
use crawlytics_core::{parse_bid_event, BidSkip, RawEvent};
use crawlytics_source::{fetch_page_within, LogSource, SourceError, TimeWindow};
use crawlytics_store::{PersistenceGateway, WriteAck};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::accumulator::BidAccumulator;

type Batch = Vec<RawEvent>;

#[derive(Debug, Default)]
struct RunCounters {
    batches_enqueued: AtomicU64,
    batches_processed: AtomicU64,
    events: AtomicU64,
    bids: AtomicU64,
    malformed: AtomicU64,
    without_impressions: AtomicU64,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidRunReport {
    pub pages_fetched: usize,
    /// The page ceiling stopped fetching before the source was exhausted.
    pub page_ceiling_reached: bool,
    pub batches: u64,
    pub events: u64,
    pub bids: u64,
    pub skipped_malformed: u64,
    pub skipped_without_impressions: u64,
    pub keys: usize,
    pub flushed: Option<WriteAck>,
    pub compacted: Option<WriteAck>,
}

struct Produced {
    pages: usize,
    ceiling_reached: bool,
}

pub struct BidStreamAggregator {
    source: Arc<dyn LogSource>,
    gateway: PersistenceGateway,
    config: BidstreamConfig,
}

impl BidStreamAggregator {
    pub fn new(
        source: Arc<dyn LogSource>,
        gateway: PersistenceGateway,
        config: BidstreamConfig,
    ) -> Self {
        Self {
            source,
            gateway,
            config,
        }
    }

    /// Aggregate the bids ingested on `date` and persist them.
    ///
    /// A failed fetch stops the producer; whatever was already queued is
    /// drained, then the run fails without flushing. A flush that is not
    /// acknowledged is reported in [`BidRunReport::flushed`] as `None`.
    #[instrument(skip(self), fields(source = self.source.name()))]
    pub async fn run(&self, date: NaiveDate) -> Result<BidRunReport> {
        let window = TimeWindow::for_day(date);
        let accumulator = Arc::new(BidAccumulator::new());
        let counters = Arc::new(RunCounters::default());

        let (sender, receiver) = mpsc::channel::<Batch>(self.config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let consumers: Vec<JoinHandle<()>> = (0..self.config.consumers.max(1))
            .map(|worker| {
                tokio::spawn(consume(
                    worker,
                    Arc::clone(&receiver),
                    Arc::clone(&accumulator),
                    Arc::clone(&counters),
                ))
            })
            .collect();

        let producer = tokio::spawn(produce(
            Arc::clone(&self.source),
            window,
            self.config.clone(),
            sender,
            Arc::clone(&counters),
        ));

        // The producer owns the only sender; once it returns the channel
        // closes and the consumers stop after draining it.
        let produced = producer.await.context("bid producer task failed")?;
        for consumer in consumers {
            consumer.await.context("bid consumer task failed")?;
        }

        let enqueued = counters.batches_enqueued.load(Ordering::SeqCst);
        let processed = counters.batches_processed.load(Ordering::SeqCst);
        if enqueued != processed {
            bail!(
                "bid queue drained with {} of {} batches processed",
                processed,
                enqueued
            );
        }
        debug!(batches = processed, "bid queue drained");

        let produced = produced.with_context(|| {
            format!("failed to fetch bid events from {}", self.source.name())
        })?;

        let mut report = BidRunReport {
            pages_fetched: produced.pages,
            page_ceiling_reached: produced.ceiling_reached,
            batches: processed,
            events: counters.events.load(Ordering::SeqCst),
            bids: counters.bids.load(Ordering::SeqCst),
            skipped_malformed: counters.malformed.load(Ordering::SeqCst),
            skipped_without_impressions: counters.without_impressions.load(Ordering::SeqCst),
            keys: accumulator.len(),
            ..Default::default()
        };

        report.flushed = accumulator.flush(&self.gateway).await;

        if self.config.aggregate_days > 0 {
            report.compacted = self.compact().await;
        }

        info!(
            pages = report.pages_fetched,
            events = report.events,
            bids = report.bids,
            keys = report.keys,
            skipped_malformed = report.skipped_malformed,
            "bid-stream run completed"
        );
        Ok(report)
    }

    /// Rebuild the rolling per-domain summaries. Failures are logged only;
    /// the flushed rows stay committed.
    async fn compact(&self) -> Option<WriteAck> {
        let days = self.config.aggregate_days;
        let today = chrono::Utc::now().date_naive();
        let since = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        info!(days, %since, "aggregating bid records");

        match self
            .gateway
            .compact_bid_rows(since, self.config.top_geos)
            .await
        {
            Ok(ack) => Some(ack),
            Err(err) => {
                error!(code = err.code(), error = %err, "bid record compaction failed");
                None
            }
        }
    }
}

async fn produce(
    source: Arc<dyn LogSource>,
    window: TimeWindow,
    config: BidstreamConfig,
    sender: mpsc::Sender<Batch>,
    counters: Arc<RunCounters>,
) -> Result<Produced, SourceError> {
    let timeout = config.fetch_timeout();
    let mut cursor = None;
    let mut pages = 0usize;

    while pages < config.max_pages {
        let page =
            fetch_page_within(source.as_ref(), &window, None, cursor.take(), timeout).await?;
        pages += 1;

        let next_cursor = page.next_cursor;
        let events = page.events.len();
        if sender.send(page.events).await.is_err() {
            return Err(SourceError::fetch(source.name(), "bid consumers stopped"));
        }
        counters.batches_enqueued.fetch_add(1, Ordering::SeqCst);
        info!(page = pages, events, "fetched bid events");

        match next_cursor {
            Some(next) => cursor = Some(next),
            None => {
                return Ok(Produced {
                    pages,
                    ceiling_reached: false,
                })
            }
        }
    }

    warn!(
        max_pages = config.max_pages,
        "bid page ceiling reached; remaining events were not fetched"
    );
    Ok(Produced {
        pages,
        ceiling_reached: true,
    })
}

async fn consume(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Batch>>>,
    accumulator: Arc<BidAccumulator>,
    counters: Arc<RunCounters>,
) {
    loop {
        let batch = receiver.lock().await.recv().await;
        let Some(batch) = batch else {
            break;
        };

        for event in &batch {
            match parse_bid_event(event) {
                Ok(bid) => {
                    accumulator.record(&bid);
                    counters.bids.fetch_add(1, Ordering::SeqCst);
                }
                Err(BidSkip::MalformedJson) => {
                    counters.malformed.fetch_add(1, Ordering::SeqCst);
                }
                Err(BidSkip::NoImpressions) => {
                    counters.without_impressions.fetch_add(1, Ordering::SeqCst);
                }
            }
        }

        counters
            .events
            .fetch_add(batch.len() as u64, Ordering::SeqCst);
        counters.batches_processed.fetch_add(1, Ordering::SeqCst);
        debug!(worker, events = batch.len(), "parsed bid batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crawlytics_source::{LogPage, StaticLogSource};
    use crawlytics_store::OpendalStore;
    use serde_json::json;

    const DAY_MS: i64 = 1_615_507_200_000; // 2021-03-12T00:00:00Z

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, 12).unwrap()
    }

    fn bid(domain: &str, geo: &str, floor: f64) -> RawEvent {
        RawEvent::new(
            json!({
                "site": {"domain": domain},
                "device": {"geo": {"country": geo}},
                "imp": [{"banner": {"w": 300, "h": 250}, "bidfloor": floor}]
            })
            .to_string(),
        )
        .ingested_at(DAY_MS + 60_000)
    }

    async fn gateway() -> PersistenceGateway {
        let gateway = PersistenceGateway::new(OpendalStore::memory().unwrap().into_shared());
        gateway.setup().await.unwrap();
        gateway
    }

    fn config(consumers: usize) -> BidstreamConfig {
        BidstreamConfig {
            queue_capacity: 2,
            consumers,
            aggregate_days: 0,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_same_key_events_fold_and_malformed_is_skipped() {
        let gateway = gateway().await;
        let source = Arc::new(StaticLogSource::from_events(
            vec![
                bid("a.com", "US", 1.0),
                RawEvent::new("{not json"),
                bid("a.com", "US", 2.5),
            ],
            1,
        ));

        let report = BidStreamAggregator::new(source, gateway.clone(), config(1))
            .run(date())
            .await
            .unwrap();

        assert_eq!(report.events, 3);
        assert_eq!(report.bids, 2);
        assert_eq!(report.skipped_malformed, 1);
        assert_eq!(report.keys, 1);
        assert_eq!(report.flushed, Some(WriteAck::inserted(1)));

        let rows = gateway
            .store()
            .find_all(crawlytics_store::gateway::BIDSTREAM_DATEWISE)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["ad_slots"], json!(["300x250"]));
        assert_eq!(rows[0]["total_cpm"], json!(3.5));
        assert_eq!(rows[0]["bids_count"], json!(2));
    }

    #[tokio::test]
    async fn test_drain_reflects_every_event_once() {
        let domains = ["a.com", "b.com", "c.com"];
        let geos = ["US", "DE"];
        let mut events = Vec::new();
        for i in 0..60 {
            events.push(bid(domains[i % 3], geos[i % 2], 0.5));
        }
        let source = Arc::new(StaticLogSource::from_events(events, 7));
        let gateway = gateway().await;

        let report = BidStreamAggregator::new(source, gateway.clone(), config(3))
            .run(date())
            .await
            .unwrap();

        assert_eq!(report.batches, 9);
        assert_eq!(report.events, 60);
        assert_eq!(report.bids, 60);
        assert_eq!(report.keys, 6);

        let rows = gateway
            .store()
            .find_all(crawlytics_store::gateway::BIDSTREAM_DATEWISE)
            .await
            .unwrap();
        let total: u64 = rows
            .iter()
            .map(|row| row["bids_count"].as_u64().unwrap())
            .sum();
        assert_eq!(total, 60);
        for row in &rows {
            assert_eq!(row["bids_count"], json!(10));
            assert_eq!(row["total_cpm"], json!(5.0));
        }
    }

    #[tokio::test]
    async fn test_page_ceiling_stops_fetching() {
        let source = Arc::new(StaticLogSource::from_events(
            (0..10).map(|_| bid("a.com", "US", 1.0)).collect(),
            1,
        ));
        let config = BidstreamConfig {
            max_pages: 3,
            ..config(1)
        };

        let shared: Arc<dyn LogSource> = source.clone();
        let report = BidStreamAggregator::new(shared, gateway().await, config)
            .run(date())
            .await
            .unwrap();

        assert!(report.page_ceiling_reached);
        assert_eq!(report.pages_fetched, 3);
        assert_eq!(report.bids, 3);
        assert_eq!(source.fetch_count(), 3);
    }

    struct FailingAfterFirstPage {
        first: StaticLogSource,
    }

    #[async_trait]
    impl LogSource for FailingAfterFirstPage {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch_page(
            &self,
            window: &TimeWindow,
            filter: Option<&str>,
            cursor: Option<String>,
        ) -> Result<LogPage, SourceError> {
            match cursor {
                None => {
                    let mut page = self.first.fetch_page(window, filter, None).await?;
                    page.next_cursor = Some("next".into());
                    Ok(page)
                }
                Some(_) => Err(SourceError::fetch("flaky", "throttled")),
            }
        }
    }

    #[tokio::test]
    async fn test_fetch_error_fails_without_flush() {
        let gateway = gateway().await;
        let source = Arc::new(FailingAfterFirstPage {
            first: StaticLogSource::from_events(vec![bid("a.com", "US", 1.0)], 10),
        });

        let result = BidStreamAggregator::new(source, gateway.clone(), config(2))
            .run(date())
            .await;
        assert!(result.is_err());
        assert!(gateway
            .store()
            .find_all(crawlytics_store::gateway::BIDSTREAM_DATEWISE)
            .await
            .unwrap()
            .is_empty());
    }

    struct Stalled;

    #[async_trait]
    impl LogSource for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn fetch_page(
            &self,
            _window: &TimeWindow,
            _filter: Option<&str>,
            _cursor: Option<String>,
        ) -> Result<LogPage, SourceError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_fails_without_flush() {
        let gateway = gateway().await;
        let config = BidstreamConfig {
            fetch_timeout_secs: 1,
            ..config(1)
        };

        let err = BidStreamAggregator::new(Arc::new(Stalled), gateway.clone(), config)
            .run(date())
            .await
            .unwrap_err();

        assert!(err.chain().any(|cause| matches!(
            cause.downcast_ref::<SourceError>(),
            Some(SourceError::Timeout { .. })
        )));
        assert!(gateway
            .store()
            .find_all(crawlytics_store::gateway::BIDSTREAM_DATEWISE)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_producer_waits_on_a_full_queue() {
        let source = Arc::new(StaticLogSource::from_events(
            (0..50).map(|_| bid("a.com", "US", 1.0)).collect(),
            1,
        ));
        let counters = Arc::new(RunCounters::default());
        let (sender, mut receiver) = mpsc::channel::<Batch>(2);

        let shared: Arc<dyn LogSource> = source.clone();
        let producer = tokio::spawn(produce(
            shared,
            TimeWindow::for_day(date()),
            config(1),
            sender,
            Arc::clone(&counters),
        ));

        // Nobody consumes: two pages fill the queue, the third waits to be sent
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(source.fetch_count(), 3);
        assert_eq!(counters.batches_enqueued.load(Ordering::SeqCst), 2);
        assert!(!producer.is_finished());

        let mut pages = 0;
        while let Some(batch) = receiver.recv().await {
            assert_eq!(batch.len(), 1);
            pages += 1;
        }
        assert_eq!(pages, 50);

        let produced = producer.await.unwrap().unwrap();
        assert_eq!(produced.pages, 50);
        assert!(!produced.ceiling_reached);
        assert_eq!(counters.batches_enqueued.load(Ordering::SeqCst), 50);
    }

    #[tokio::test]
    async fn test_compaction_after_flush() {
        let gateway = gateway().await;
        let source = Arc::new(StaticLogSource::from_events(
            vec![bid("a.com", "US", 1.0), bid("a.com", "DE", 2.0)],
            10,
        ));
        // Large enough that the 2021 rows fall inside the rolling window
        let config = BidstreamConfig {
            aggregate_days: 36_500,
            ..config(1)
        };

        let report = BidStreamAggregator::new(source, gateway.clone(), config)
            .run(date())
            .await
            .unwrap();
        assert_eq!(report.compacted, Some(WriteAck::inserted(1)));

        let summaries = gateway
            .store()
            .find_all(crawlytics_store::gateway::BIDSTREAM)
            .await
            .unwrap();
        assert_eq!(summaries[0]["avg_cpm"], json!(1.5));
        assert_eq!(summaries[0]["geo"], json!(["DE", "US"]));
    }
}
