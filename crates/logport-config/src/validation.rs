// Configuration validation
//
// Validates that required fields are present and values are sensible.

use crate::{
    CoalescerSection, RetrySection, RuntimeConfig, ServerSection, StorageBackend, StorageSection,
    StreamSection, WorkerSection,
};
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &RuntimeConfig) -> Result<()> {
    validate_coalescer_config(&config.coalescer)?;
    validate_stream_config(&config.stream)?;
    validate_worker_config(&config.worker)?;
    validate_retry_config(&config.retry)?;
    validate_storage_config(&config.storage)?;
    validate_server_config(&config.server)?;
    Ok(())
}

fn validate_coalescer_config(config: &CoalescerSection) -> Result<()> {
    if config.max_batch_size == 0 {
        bail!("coalescer.max_batch_size must be greater than 0");
    }
    if config.max_wait_ms == 0 {
        bail!("coalescer.max_wait_ms must be greater than 0");
    }
    if config.max_batch_size > 100_000 {
        warn!(
            max_batch_size = config.max_batch_size,
            "coalescer.max_batch_size is very large; may cause memory issues"
        );
    }
    Ok(())
}

fn validate_stream_config(config: &StreamSection) -> Result<()> {
    if config.redis_url.is_empty() {
        bail!("stream.redis_url must not be empty");
    }
    if config.stream_name.is_empty() {
        bail!("stream.stream_name must not be empty");
    }
    if config.consumer_group.is_empty() {
        bail!("stream.consumer_group must not be empty");
    }
    if config.max_len == 0 {
        bail!("stream.max_len must be greater than 0");
    }
    Ok(())
}

fn validate_worker_config(config: &WorkerSection) -> Result<()> {
    if config.worker_count == 0 {
        bail!("worker.worker_count must be greater than 0");
    }
    if config.batch_size == 0 {
        bail!("worker.batch_size must be greater than 0");
    }
    if config.max_batch_size == 0 {
        bail!("worker.max_batch_size must be greater than 0");
    }
    if config.heartbeat_interval_secs == 0 {
        bail!("worker.heartbeat_interval_secs must be greater than 0");
    }
    if config.worker_count > 256 {
        warn!(
            worker_count = config.worker_count,
            "worker.worker_count is unusually large"
        );
    }
    Ok(())
}

fn validate_retry_config(config: &RetrySection) -> Result<()> {
    if config.max_attempts == 0 {
        bail!("retry.max_attempts must be greater than 0");
    }
    if config.base_delay_ms == 0 {
        bail!("retry.base_delay_ms must be greater than 0");
    }
    if config.max_delay_ms < config.base_delay_ms {
        bail!("retry.max_delay_ms must be >= retry.base_delay_ms");
    }
    if config.persistence == crate::RetryPersistence::Sqlite && config.sqlite_path.is_empty() {
        bail!("retry.sqlite_path is required when retry.persistence = \"sqlite\"");
    }
    Ok(())
}

fn validate_storage_config(config: &StorageSection) -> Result<()> {
    match config.backend {
        StorageBackend::Fs => {
            if config.fs_path.is_empty() {
                bail!("storage.fs_path must not be empty for the fs backend");
            }
        }
        StorageBackend::S3 => {
            if config.s3_bucket.is_empty() {
                bail!("storage.s3_bucket is required for the s3 backend");
            }
            if config.s3_region.is_empty() {
                bail!("storage.s3_region is required for the s3 backend");
            }
        }
    }
    Ok(())
}

fn validate_server_config(config: &ServerSection) -> Result<()> {
    if config.bind_addr.is_empty() {
        bail!("server.bind_addr must not be empty");
    }
    if config.max_payload_bytes == 0 {
        bail!("server.max_payload_bytes must be greater than 0");
    }
    if config.max_payload_bytes > 100 * 1024 * 1024 {
        warn!(
            max_payload_bytes = config.max_payload_bytes,
            "server.max_payload_bytes is very large; may cause issues"
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        validate_config(&RuntimeConfig::default()).expect("defaults should validate");
    }

    #[test]
    fn zero_worker_count_is_rejected() {
        let mut config = RuntimeConfig::default();
        config.worker.worker_count = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn sqlite_persistence_requires_path() {
        let mut config = RuntimeConfig::default();
        config.retry.persistence = crate::RetryPersistence::Sqlite;
        config.retry.sqlite_path = String::new();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let mut config = RuntimeConfig::default();
        config.storage.backend = StorageBackend::S3;
        config.storage.s3_bucket = String::new();
        assert!(validate_config(&config).is_err());
    }
}
