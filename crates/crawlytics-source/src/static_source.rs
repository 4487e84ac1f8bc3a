//! In-memory log source, also loadable from a JSON-lines export of log events.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use crawlytics_core::RawEvent;
use tracing::debug;

use crate::error::SourceError;
use crate::window::TimeWindow;
use crate::{LogPage, LogSource};

const SOURCE_NAME: &str = "static";

/// Serves fixed pages of events. Cursors are page indexes.
///
/// A filter keeps the events whose message contains every whitespace
/// separated term; events outside the window are dropped, events without a
/// timestamp are kept.
#[derive(Debug, Default)]
pub struct StaticLogSource {
    pages: Vec<Vec<RawEvent>>,
    fetches: AtomicUsize,
}

impl StaticLogSource {
    pub fn from_pages(pages: Vec<Vec<RawEvent>>) -> Self {
        Self {
            pages,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn from_events(events: Vec<RawEvent>, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let pages = events
            .chunks(page_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        Self::from_pages(pages)
    }

    /// Plain lines become events without timestamps.
    pub fn from_lines<I, S>(lines: I, page_size: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_events(lines.into_iter().map(RawEvent::new).collect(), page_size)
    }

    /// One JSON event per line (`message`, optional `timestamp` and
    /// `ingestionTime`). Blank lines are ignored.
    pub fn from_jsonl(path: impl AsRef<Path>, page_size: usize) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let events = content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(index, line)| {
                serde_json::from_str::<RawEvent>(line).map_err(|source| {
                    SourceError::MalformedExport {
                        path: path.to_path_buf(),
                        line_number: index + 1,
                        source,
                    }
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        debug!(path = %path.display(), events = events.len(), "loaded event export");
        Ok(Self::from_events(events, page_size))
    }

    /// Number of `fetch_page` calls served so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }
}

fn matches_filter(message: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |filter| {
        filter
            .split_whitespace()
            .map(|term| term.trim_matches('"'))
            .all(|term| message.contains(term))
    })
}

#[async_trait]
impl LogSource for StaticLogSource {
    fn name(&self) -> &str {
        SOURCE_NAME
    }

    async fn fetch_page(
        &self,
        window: &TimeWindow,
        filter: Option<&str>,
        cursor: Option<String>,
    ) -> Result<LogPage, SourceError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);

        let index = match cursor {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| SourceError::fetch(SOURCE_NAME, format!("invalid cursor {cursor:?}")))?,
            None => 0,
        };

        let events = self
            .pages
            .get(index)
            .map(|page| {
                page.iter()
                    .filter(|event| event.timestamp.map_or(true, |ts| window.contains(ts)))
                    .filter(|event| matches_filter(&event.message, filter))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let next_cursor = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(LogPage {
            events,
            next_cursor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::io::Write;

    fn window() -> TimeWindow {
        TimeWindow::for_day(NaiveDate::from_ymd_opt(2021, 3, 12).unwrap())
    }

    #[tokio::test]
    async fn test_pages_follow_cursors() {
        let source = StaticLogSource::from_lines(["a", "b", "c"], 2);

        let first = source.fetch_page(&window(), None, None).await.unwrap();
        assert_eq!(first.events.len(), 2);
        assert_eq!(first.next_cursor.as_deref(), Some("1"));

        let second = source
            .fetch_page(&window(), None, first.next_cursor)
            .await
            .unwrap();
        assert_eq!(second.events[0].message, "c");
        assert_eq!(second.next_cursor, None);
        assert_eq!(source.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_filter_and_window() {
        let inside = window().start_ms + 1000;
        let source = StaticLogSource::from_events(
            vec![
                RawEvent {
                    message: "2021-03-12 10:00:00 INFO:crawler:PAGE_CRAWLED: url x".into(),
                    timestamp: Some(inside),
                    ingestion_time: None,
                },
                RawEvent {
                    message: "2021-03-13 10:00:00 INFO:crawler:PAGE_CRAWLED: url y".into(),
                    timestamp: Some(window().end_ms + 1000),
                    ingestion_time: None,
                },
                RawEvent::new("2021-03-12 10:00:00 ERROR:crawler:PAGE_CRAWL_ERROR: x on y"),
            ],
            10,
        );

        let page = source
            .fetch_page(&window(), Some("INFO PAGE_CRAWLED"), None)
            .await
            .unwrap();
        assert_eq!(page.events.len(), 1);
        assert_eq!(page.events[0].timestamp, Some(inside));
    }

    #[test]
    fn test_from_jsonl() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"message": "{{}}", "ingestionTime": 1615564800000}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"message": "x"}}"#).unwrap();
        let source = StaticLogSource::from_jsonl(file.path(), 1).unwrap();
        assert_eq!(source.pages.len(), 2);
        assert_eq!(source.pages[0][0].ingestion_time, Some(1_615_564_800_000));

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        writeln!(bad, "not json").unwrap();
        assert!(matches!(
            StaticLogSource::from_jsonl(bad.path(), 1),
            Err(SourceError::MalformedExport { line_number: 1, .. })
        ));
    }
}
