// Configuration validation
//
// Validates that required fields are present and values are sensible

use super::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_storage_config(&config.storage)?;
    validate_cloudwatch_config(&config.cloudwatch)?;
    validate_bidstream_config(&config.bidstream)?;
    Ok(())
}

fn validate_storage_config(config: &StorageConfig) -> Result<()> {
    match config.backend {
        StorageBackend::Memory => {}
        StorageBackend::Fs => {
            // No [storage.fs] section means the default ./data directory
            if let Some(fs) = config.fs.as_ref() {
                if fs.path.is_empty() {
                    bail!(
                        "Filesystem path is required\n\n\
                        How to fix:\n\
                          • Environment: export {}STORAGE_PATH=/data/crawlytics\n\
                          • TOML: [storage.fs]\n              path = \"/data/crawlytics\"\n",
                        ENV_PREFIX
                    );
                }
            }
        }
        StorageBackend::S3 => {
            let s3 = config
                .s3
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("s3 storage backend requires 's3' configuration"))?;

            if s3.bucket.is_empty() {
                bail!(
                    "S3 bucket name is required\n\n\
                    How to fix:\n\
                      • Environment: export {}S3_BUCKET=my-bucket\n\
                      • TOML: [storage.s3]\n              bucket = \"my-bucket\"\n",
                    ENV_PREFIX
                );
            }

            if s3.region.is_empty() {
                bail!(
                    "S3 region is required\n\n\
                    How to fix:\n\
                      • Environment: export {}S3_REGION=us-west-2\n\
                      • TOML: [storage.s3]\n              region = \"us-west-2\"\n",
                    ENV_PREFIX
                );
            }
        }
    }

    Ok(())
}

fn validate_cloudwatch_config(config: &CloudWatchConfig) -> Result<()> {
    if config.page_limit == 0 {
        bail!("cloudwatch.page_limit must be greater than 0");
    }
    if config.fetch_timeout_secs == 0 {
        bail!("cloudwatch.fetch_timeout_secs must be greater than 0");
    }

    // FilterLogEvents caps a page at 10,000 events
    if config.page_limit > 10_000 {
        warn!(
            page_limit = config.page_limit,
            "cloudwatch.page_limit is above the service maximum; pages will be capped"
        );
    }

    Ok(())
}

fn validate_bidstream_config(config: &BidstreamConfig) -> Result<()> {
    if config.queue_capacity == 0 {
        bail!("bidstream.queue_capacity must be greater than 0");
    }

    if config.consumers == 0 {
        bail!("bidstream.consumers must be greater than 0");
    }

    if config.max_pages == 0 {
        bail!("bidstream.max_pages must be greater than 0");
    }

    if config.fetch_timeout_secs == 0 {
        bail!("bidstream.fetch_timeout_secs must be greater than 0");
    }

    if config.top_geos == 0 {
        bail!("bidstream.top_geos must be greater than 0");
    }

    // Each queued batch holds a full page of events
    if config.queue_capacity > 1024 {
        warn!(
            queue_capacity = config.queue_capacity,
            "bidstream.queue_capacity is very large; may cause memory issues"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_bidstream_config() {
        assert!(validate_bidstream_config(&BidstreamConfig::default()).is_ok());

        let no_consumers = BidstreamConfig {
            consumers: 0,
            ..Default::default()
        };
        assert!(validate_bidstream_config(&no_consumers).is_err());

        let no_pages = BidstreamConfig {
            max_pages: 0,
            ..Default::default()
        };
        assert!(validate_bidstream_config(&no_pages).is_err());

        let huge_queue = BidstreamConfig {
            queue_capacity: 100_000,
            ..Default::default()
        };
        assert!(validate_bidstream_config(&huge_queue).is_ok());
    }

    #[test]
    fn test_validate_cloudwatch_config() {
        assert!(validate_cloudwatch_config(&CloudWatchConfig::default()).is_ok());

        let no_timeout = CloudWatchConfig {
            fetch_timeout_secs: 0,
            ..Default::default()
        };
        assert!(validate_cloudwatch_config(&no_timeout).is_err());
    }

    #[test]
    fn test_validate_storage_config() {
        let s3_config = StorageConfig {
            backend: StorageBackend::S3,
            fs: None,
            s3: Some(S3Config {
                bucket: "rollups".to_string(),
                region: "us-east-1".to_string(),
                endpoint: None,
                prefix: None,
            }),
        };
        assert!(validate_storage_config(&s3_config).is_ok());

        let missing_bucket = StorageConfig {
            backend: StorageBackend::S3,
            fs: None,
            s3: Some(S3Config {
                bucket: String::new(),
                region: "us-east-1".to_string(),
                endpoint: None,
                prefix: None,
            }),
        };
        assert!(validate_storage_config(&missing_bucket).is_err());

        let empty_path = StorageConfig {
            backend: StorageBackend::Fs,
            fs: Some(FsConfig {
                path: String::new(),
            }),
            s3: None,
        };
        assert!(validate_storage_config(&empty_path).is_err());
    }
}
