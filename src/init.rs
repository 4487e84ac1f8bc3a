// Initialization utilities
//
// Document store and logging/tracing setup

use anyhow::{Context, Result};
use crawlytics_config::{LogFormat, RuntimeConfig, StorageBackend};
use crawlytics_store::{OpendalStore, PersistenceGateway};
use tracing::info;

/// Open the configured document store and register its unique indexes.
pub async fn init_gateway(config: &RuntimeConfig) -> Result<PersistenceGateway> {
    info!(backend = %config.storage.backend, "initializing document store");

    match config.storage.backend {
        StorageBackend::Memory => info!("using in-memory storage; rollups are not persisted"),
        StorageBackend::Fs => {
            let path = config
                .storage
                .fs
                .as_ref()
                .map(|fs| fs.path.clone())
                .unwrap_or_else(|| "./data".to_string());
            info!(path = %path, "using filesystem storage");
        }
        StorageBackend::S3 => {
            if let Some(s3) = config.storage.s3.as_ref() {
                info!(bucket = %s3.bucket, region = %s3.region, "using S3 storage");
            }
        }
    }

    let store = OpendalStore::from_config(&config.storage)
        .context("failed to initialize document store")?;
    let gateway = PersistenceGateway::new(store.into_shared());
    gateway
        .setup()
        .await
        .context("failed to set up document store")?;
    Ok(gateway)
}

/// Initialize tracing/logging from RuntimeConfig
pub fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Try to set the global subscriber; ignore error if already set (idempotent)
    let _ = match config.logging.format {
        LogFormat::Json => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
        }
        LogFormat::Text => tracing::subscriber::set_global_default(registry.with(fmt::layer())),
    };
}
