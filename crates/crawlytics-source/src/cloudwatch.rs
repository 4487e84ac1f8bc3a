//! CloudWatch Logs source backed by `FilterLogEvents`.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudwatchlogs::error::DisplayErrorContext;
use aws_sdk_cloudwatchlogs::Client;
use crawlytics_config::CloudWatchConfig;
use crawlytics_core::RawEvent;
use tracing::{debug, instrument};

use crate::error::SourceError;
use crate::window::TimeWindow;
use crate::{LogPage, LogSource};

/// Service maximum for `FilterLogEvents` page sizes.
const MAX_PAGE_LIMIT: u32 = 10_000;

pub struct CloudWatchLogSource {
    client: Client,
    log_group: String,
    page_limit: u32,
}

impl CloudWatchLogSource {
    /// Build a client from the ambient AWS configuration, with region and
    /// static credentials overridden by `config` when set.
    pub async fn from_config(config: &CloudWatchConfig, log_group: impl Into<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(aws_config::Region::new(region.clone()));
        }
        if let (Some(access_key_id), Some(secret_access_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(aws_credential_types::Credentials::new(
                access_key_id,
                secret_access_key,
                None,
                None,
                "crawlytics-config",
            ));
        }
        let sdk_config = loader.load().await;
        Self::new(Client::new(&sdk_config), log_group, config.page_limit)
    }

    pub fn new(client: Client, log_group: impl Into<String>, page_limit: u32) -> Self {
        Self {
            client,
            log_group: log_group.into(),
            page_limit: page_limit.clamp(1, MAX_PAGE_LIMIT),
        }
    }
}

#[async_trait]
impl LogSource for CloudWatchLogSource {
    fn name(&self) -> &str {
        &self.log_group
    }

    #[instrument(skip(self, window, cursor), fields(log_group = %self.log_group))]
    async fn fetch_page(
        &self,
        window: &TimeWindow,
        filter: Option<&str>,
        cursor: Option<String>,
    ) -> Result<LogPage, SourceError> {
        let response = self
            .client
            .filter_log_events()
            .log_group_name(&self.log_group)
            .start_time(window.start_ms)
            .end_time(window.end_ms)
            .limit(self.page_limit as i32)
            .set_filter_pattern(filter.map(str::to_string))
            .set_next_token(cursor)
            .send()
            .await
            .map_err(|e| SourceError::fetch(&self.log_group, DisplayErrorContext(&e)))?;

        let events: Vec<RawEvent> = response
            .events()
            .iter()
            .map(|event| RawEvent {
                message: event.message().unwrap_or_default().to_string(),
                timestamp: event.timestamp(),
                ingestion_time: event.ingestion_time(),
            })
            .collect();

        debug!(events = events.len(), "fetched log events");
        Ok(LogPage {
            events,
            next_cursor: response.next_token().map(str::to_string),
        })
    }
}
