// crawlytics-bidstream - Streaming bid-record aggregation
//
// A single producer pages through a day of bid-request events into a bounded
// queue; a pool of consumers folds them into keyed aggregates that are
// flushed as idempotent upserts once the queue is drained.

mod accumulator;
mod pipeline;

pub use accumulator::BidAccumulator;
pub use pipeline::{BidRunReport, BidStreamAggregator};
