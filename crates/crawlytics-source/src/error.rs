use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to fetch events from {source_name}: {message}")]
    Fetch {
        source_name: String,
        message: String,
    },

    #[error("fetching a page from {source_name} timed out after {after:?}")]
    Timeout {
        source_name: String,
        after: Duration,
    },

    #[error("failed to read export {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("export {} line {line_number} is not a log event: {source}", path.display())]
    MalformedExport {
        path: PathBuf,
        line_number: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl SourceError {
    pub fn fetch(source_name: impl Into<String>, message: impl ToString) -> Self {
        Self::Fetch {
            source_name: source_name.into(),
            message: message.to_string(),
        }
    }

    pub fn timeout(source_name: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            source_name: source_name.into(),
            after,
        }
    }
}
