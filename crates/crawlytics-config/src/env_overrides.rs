use super::{FsConfig, LogFormat, RuntimeConfig, S3Config, StorageBackend};
use anyhow::{anyhow, Context, Result};
use std::str::FromStr;

pub const ENV_PREFIX: &str = "CRAWLYTICS_";

/// Abstraction over environment-variable lookups so tests can supply their
/// own source of overrides.
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;

    /// Get an environment variable WITHOUT the CRAWLYTICS_ prefix
    /// Used for AWS standard variables (AWS_REGION, AWS_ACCESS_KEY_ID, etc.)
    fn get_raw(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the runtime config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut RuntimeConfig, env: &E) -> Result<()> {
    // Logging
    if let Some(level) = env.get("LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = env.get("LOG_FORMAT") {
        config.logging.format = match format.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        };
    }

    // Storage backend
    if let Some(backend) = env.get("STORAGE_BACKEND") {
        config.storage.backend = backend
            .parse::<StorageBackend>()
            .context("Invalid CRAWLYTICS_STORAGE_BACKEND value")?;
    }
    if let Some(path) = env.get("STORAGE_PATH") {
        config.storage.fs.get_or_insert_with(FsConfig::default).path = path;
    }
    if let Some(bucket) = env.get("S3_BUCKET") {
        ensure_s3(config).bucket = bucket;
    }
    if let Some(region) = env.get("S3_REGION") {
        ensure_s3(config).region = region;
    }
    if let Some(endpoint) = env.get("S3_ENDPOINT") {
        ensure_s3(config).endpoint = Some(endpoint);
    }
    if let Some(prefix) = env.get("S3_PREFIX") {
        ensure_s3(config).prefix = normalize_prefix(prefix);
    }

    // Local logs
    if let Some(path) = env.get("LOGS_PATH") {
        config.logs.path = Some(path);
    }

    // CloudWatch: AWS standard variables first, prefixed ones win
    if let Some(region) = env.get_raw("AWS_REGION") {
        config.cloudwatch.region = Some(region);
    }
    if let Some(region) = env.get("CLOUDWATCH_REGION") {
        config.cloudwatch.region = Some(region);
    }
    if let Some(access_key_id) = env.get_raw("AWS_ACCESS_KEY_ID") {
        config.cloudwatch.access_key_id = Some(access_key_id);
    }
    if let Some(secret_access_key) = env.get_raw("AWS_SECRET_ACCESS_KEY") {
        config.cloudwatch.secret_access_key = Some(secret_access_key);
    }
    if let Some(group) = env.get("LOG_GROUP") {
        config.cloudwatch.log_group = Some(group);
    }
    if let Some(group) = env.get("ADV_LOG_GROUP") {
        config.cloudwatch.adv_log_group = Some(group);
    }
    if let Some(group) = env.get("BIDSTREAM_LOG_GROUP") {
        config.cloudwatch.bidstream_log_group = Some(group);
    }
    if let Some(limit) = get_env_parsed(env, "LOG_ITEMS_LIMIT")? {
        config.cloudwatch.page_limit = limit;
    }
    if let Some(secs) = get_env_parsed(env, "CLOUDWATCH_FETCH_TIMEOUT_SECS")? {
        config.cloudwatch.fetch_timeout_secs = secs;
    }

    // Bid-stream pipeline
    if let Some(val) = get_env_parsed(env, "QUEUE_CAPACITY")? {
        config.bidstream.queue_capacity = val;
    }
    if let Some(val) = get_env_parsed(env, "CONSUMERS")? {
        config.bidstream.consumers = val;
    }
    if let Some(val) = get_env_parsed(env, "MAX_PAGES")? {
        config.bidstream.max_pages = val;
    }
    if let Some(val) = get_env_parsed(env, "FETCH_TIMEOUT_SECS")? {
        config.bidstream.fetch_timeout_secs = val;
    }
    if let Some(val) = get_env_parsed(env, "AGGREGATE_DAYS")? {
        config.bidstream.aggregate_days = val;
    }
    if let Some(val) = get_env_parsed(env, "TOP_GEOS")? {
        config.bidstream.top_geos = val;
    }

    Ok(())
}

fn ensure_s3(config: &mut RuntimeConfig) -> &mut S3Config {
    config.storage.s3.get_or_insert_with(|| S3Config {
        bucket: String::new(),
        region: String::new(),
        endpoint: None,
        prefix: None,
    })
}

fn get_env_parsed<E, T>(env: &E, key: &str) -> Result<Option<T>>
where
    E: EnvSource,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.get(key) {
        Some(val) => {
            let parsed = val
                .parse::<T>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn normalize_prefix(prefix: String) -> Option<String> {
    if prefix.is_empty() {
        None
    } else if prefix.ends_with('/') {
        Some(prefix)
    } else {
        Some(format!("{}/", prefix))
    }
}
