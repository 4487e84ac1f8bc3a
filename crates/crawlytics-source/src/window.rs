use chrono::{NaiveDate, NaiveTime};

const LAST_SECOND_OF_DAY_MS: i64 = (24 * 60 * 60 - 1) * 1000;

/// Inclusive range of epoch milliseconds queried from a log source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl TimeWindow {
    /// `[00:00:00, 23:59:59]` UTC of `date`.
    pub fn for_day(date: NaiveDate) -> Self {
        let start_ms = date.and_time(NaiveTime::MIN).and_utc().timestamp_millis();
        Self {
            start_ms,
            end_ms: start_ms + LAST_SECOND_OF_DAY_MS,
        }
    }

    pub fn contains(&self, millis: i64) -> bool {
        (self.start_ms..=self.end_ms).contains(&millis)
    }
}
