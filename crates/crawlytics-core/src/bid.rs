//! Bid-stream records: parsing bid requests out of raw events, folding them
//! into per-(day, domain, geo) aggregates and compacting persisted rows into
//! per-domain summaries.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event::RawEvent;

/// Aggregation key. Absent fields stay absent rather than being folded into
/// a sentinel string, so a missing geo never collides with a literal one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BidRecordKey {
    pub ingested_on: Option<NaiveDate>,
    pub domain: Option<String>,
    pub geo: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BidRecordAggregate {
    pub ad_slots: BTreeSet<String>,
    pub total_cpm: f64,
    pub bids_count: u64,
}

impl BidRecordAggregate {
    pub fn apply(&mut self, bid: &BidObservation) {
        self.ad_slots.insert(bid.ad_slot.clone());
        self.total_cpm = round_cpm(self.total_cpm + bid.bid_floor);
        self.bids_count += 1;
    }
}

/// Round to 4 decimal places.
pub fn round_cpm(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// A single parsed bid request.
#[derive(Debug, Clone, PartialEq)]
pub struct BidObservation {
    pub key: BidRecordKey,
    pub ad_slot: String,
    pub bid_floor: f64,
}

/// Why a raw event did not yield a bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidSkip {
    MalformedJson,
    NoImpressions,
}

/// Scalar rendered the way it appears in the payload; strings unquoted.
fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn lookup<'a>(root: &'a Value, path: &[&str]) -> Option<&'a Value> {
    path.iter().try_fold(root, |value, field| value.get(field))
}

fn dimension(banner: Option<&Value>, field: &str) -> String {
    banner
        .and_then(|banner| banner.get(field))
        .and_then(render)
        .unwrap_or_else(|| "0".to_string())
}

/// UTC calendar day of an epoch-millisecond timestamp.
pub fn day_from_millis(millis: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(millis).map(|ts| ts.date_naive())
}

/// Parse a bid request out of a raw event.
///
/// The message must be a JSON object with a non-empty `imp` list. Only the
/// first impression contributes its banner size and bid floor.
pub fn parse_bid_event(event: &RawEvent) -> Result<BidObservation, BidSkip> {
    let message: Value =
        serde_json::from_str(&event.message).map_err(|_| BidSkip::MalformedJson)?;
    if !message.is_object() {
        return Err(BidSkip::MalformedJson);
    }

    let impression = match message.get("imp") {
        Some(Value::Array(imps)) if !imps.is_empty() => &imps[0],
        _ => return Err(BidSkip::NoImpressions),
    };

    let banner = impression.get("banner");
    let ad_slot = format!(
        "{}x{}",
        dimension(banner, "w"),
        dimension(banner, "h")
    );

    Ok(BidObservation {
        key: BidRecordKey {
            ingested_on: event.ingestion_time.and_then(day_from_millis),
            domain: lookup(&message, &["site", "domain"]).and_then(render),
            geo: lookup(&message, &["device", "geo", "country"]).and_then(render),
        },
        ad_slot,
        bid_floor: impression
            .get("bidfloor")
            .and_then(Value::as_f64)
            .unwrap_or(0.0),
    })
}

/// Persisted per-key row (`bidstream_datewise`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidRow {
    pub ingested_on: Option<NaiveDate>,
    pub domain: Option<String>,
    pub geo: Option<String>,
    pub ad_slots: Vec<String>,
    pub total_cpm: f64,
    pub bids_count: u64,
}

impl BidRow {
    pub fn new(key: &BidRecordKey, aggregate: &BidRecordAggregate) -> Self {
        Self {
            ingested_on: key.ingested_on,
            domain: key.domain.clone(),
            geo: key.geo.clone(),
            ad_slots: aggregate.ad_slots.iter().cloned().collect(),
            total_cpm: aggregate.total_cpm,
            bids_count: aggregate.bids_count,
        }
    }
}

/// Compacted per-domain row (`bidstream`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BidSummary {
    pub domain: Option<String>,
    pub avg_cpm: f64,
    pub ad_slots: u64,
    pub geo: Vec<Option<String>>,
}

#[derive(Default)]
struct GeoTotals<'a> {
    bids_count: u64,
    total_cpm: f64,
    ad_slots: BTreeSet<&'a str>,
}

/// Roll rows ingested on or after `since` up into one summary per domain.
///
/// `geo` lists the `top_geos` geos with the most bids, ties broken by geo.
/// Rows without an ingestion day are left out.
pub fn summarize_bid_rows(rows: &[BidRow], since: NaiveDate, top_geos: usize) -> Vec<BidSummary> {
    let mut by_domain: BTreeMap<Option<&str>, HashMap<Option<&str>, GeoTotals<'_>>> =
        BTreeMap::new();

    for row in rows
        .iter()
        .filter(|row| row.ingested_on.is_some_and(|day| day >= since))
    {
        let totals = by_domain
            .entry(row.domain.as_deref())
            .or_default()
            .entry(row.geo.as_deref())
            .or_default();
        totals.bids_count += row.bids_count;
        totals.total_cpm += row.total_cpm;
        totals.ad_slots.extend(row.ad_slots.iter().map(String::as_str));
    }

    by_domain
        .into_iter()
        .map(|(domain, geos)| {
            let bids: u64 = geos.values().map(|geo| geo.bids_count).sum();
            let cpm: f64 = geos.values().map(|geo| geo.total_cpm).sum();
            let slots: BTreeSet<&str> = geos
                .values()
                .flat_map(|geo| geo.ad_slots.iter().copied())
                .collect();

            let mut ranked: Vec<(Option<&str>, u64)> = geos
                .iter()
                .map(|(geo, totals)| (*geo, totals.bids_count))
                .collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

            BidSummary {
                domain: domain.map(str::to_string),
                avg_cpm: if bids > 0 { cpm / bids as f64 } else { 0.0 },
                ad_slots: slots.len() as u64,
                geo: ranked
                    .into_iter()
                    .take(top_geos)
                    .map(|(geo, _)| geo.map(str::to_string))
                    .collect(),
            }
        })
        .collect()
}
