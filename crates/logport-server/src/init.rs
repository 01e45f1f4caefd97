// Storage and logging initialization

use anyhow::Result;
use logport_config::{LogFormat, RuntimeConfig, StorageBackend};
use opendal::Operator;
use tracing::info;

pub(crate) fn init_storage(config: &RuntimeConfig) -> Result<Operator> {
    info!(
        backend = ?config.storage.backend,
        "initializing analytics sink storage backend"
    );

    let operator = match config.storage.backend {
        StorageBackend::Fs => {
            info!(path = %config.storage.fs_path, "using filesystem storage");
            let builder = opendal::services::Fs::default().root(&config.storage.fs_path);
            Operator::new(builder)?.finish()
        }
        StorageBackend::S3 => {
            info!(
                bucket = %config.storage.s3_bucket,
                region = %config.storage.s3_region,
                "using S3 storage"
            );
            let mut builder = opendal::services::S3::default()
                .bucket(&config.storage.s3_bucket)
                .region(&config.storage.s3_region);
            if let Some(endpoint) = &config.storage.s3_endpoint {
                builder = builder.endpoint(endpoint);
            }
            Operator::new(builder)?.finish()
        }
    };

    Ok(operator)
}

pub(crate) fn init_tracing(config: &RuntimeConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    match config.server.log_format {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).init();
        }
        LogFormat::Text => {
            registry.with(fmt::layer()).init();
        }
    }
}
