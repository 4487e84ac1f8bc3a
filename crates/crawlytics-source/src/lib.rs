// crawlytics-source - Paginated log-event sources
//
// A source serves one page of raw events per call for a time window and an
// optional filter pattern, plus a cursor for the next page.

use std::time::Duration;

use async_trait::async_trait;
use crawlytics_core::RawEvent;
use tracing::debug;

#[cfg(feature = "cloudwatch")]
pub mod cloudwatch;
mod error;
mod static_source;
mod window;

#[cfg(feature = "cloudwatch")]
pub use cloudwatch::CloudWatchLogSource;
pub use error::SourceError;
pub use static_source::StaticLogSource;
pub use window::TimeWindow;

/// One page of events and the cursor of the next page, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogPage {
    pub events: Vec<RawEvent>,
    pub next_cursor: Option<String>,
}

#[async_trait]
pub trait LogSource: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &str;

    async fn fetch_page(
        &self,
        window: &TimeWindow,
        filter: Option<&str>,
        cursor: Option<String>,
    ) -> Result<LogPage, SourceError>;
}

/// Fetch one page, failing with [`SourceError::Timeout`] after `timeout`.
pub async fn fetch_page_within(
    source: &dyn LogSource,
    window: &TimeWindow,
    filter: Option<&str>,
    cursor: Option<String>,
    timeout: Duration,
) -> Result<LogPage, SourceError> {
    tokio::time::timeout(timeout, source.fetch_page(window, filter, cursor))
        .await
        .map_err(|_| SourceError::timeout(source.name(), timeout))?
}

/// Follow cursors until the source is exhausted and return every message.
/// Each page must arrive within `fetch_timeout`.
pub async fn collect_lines(
    source: &dyn LogSource,
    window: &TimeWindow,
    filter: Option<&str>,
    fetch_timeout: Duration,
) -> Result<Vec<String>, SourceError> {
    let mut lines = Vec::new();
    let mut cursor = None;
    let mut pages = 0usize;

    loop {
        let page = fetch_page_within(source, window, filter, cursor, fetch_timeout).await?;
        pages += 1;
        lines.extend(page.events.into_iter().map(|event| event.message));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    debug!(
        source = source.name(),
        filter = filter.unwrap_or_default(),
        pages,
        lines = lines.len(),
        "collected log lines"
    );
    Ok(lines)
}
