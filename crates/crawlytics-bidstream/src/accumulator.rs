//! Keyed bid aggregates owned by one pipeline run.

use std::collections::HashMap;

use crawlytics_core::{BidObservation, BidRecordAggregate, BidRecordKey, BidRow};
use crawlytics_store::{PersistenceGateway, WriteAck};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Shared by every consumer of a run. The map lock makes updates to a key
/// mutually exclusive.
#[derive(Debug, Default)]
pub struct BidAccumulator {
    entries: Mutex<HashMap<BidRecordKey, BidRecordAggregate>>,
}

impl BidAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, bid: &BidObservation) {
        self.entries
            .lock()
            .entry(bid.key.clone())
            .or_default()
            .apply(bid);
    }

    pub fn get(&self, key: &BidRecordKey) -> Option<BidRecordAggregate> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of every aggregate as a persisted row, ordered by key.
    pub fn rows(&self) -> Vec<BidRow> {
        let entries = self.entries.lock();
        let mut keys: Vec<&BidRecordKey> = entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| BidRow::new(key, &entries[key]))
            .collect()
    }

    /// Upsert every row. The map is cleared only once the store acknowledges
    /// the batch.
    pub async fn flush(&self, gateway: &PersistenceGateway) -> Option<WriteAck> {
        let rows = self.rows();
        let ack = gateway.upsert_bid_rows(&rows).await;
        match ack {
            Some(ack) => {
                info!(
                    added = ack.inserted,
                    updated = ack.updated,
                    "flushed bid records"
                );
                self.entries.lock().clear();
            }
            None => warn!(keys = rows.len(), "bid records not acknowledged; keeping them in memory"),
        }
        ack
    }
}
