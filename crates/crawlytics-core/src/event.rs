//! Raw log events as delivered by a log source.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// One log event: the raw message plus the source's event and ingestion
/// times in epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub message: String,
    #[serde(default, deserialize_with = "lenient_millis")]
    pub timestamp: Option<i64>,
    #[serde(default, alias = "ingestionTime", deserialize_with = "lenient_millis")]
    pub ingestion_time: Option<i64>,
}

impl RawEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: None,
            ingestion_time: None,
        }
    }

    pub fn ingested_at(mut self, millis: i64) -> Self {
        self.ingestion_time = Some(millis);
        self
    }
}

/// Integer milliseconds, or `None` for anything else.
fn lenient_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|value| value.as_i64()))
}
