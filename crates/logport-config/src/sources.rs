// Configuration source loading
//
// Priority, highest to lowest:
// 1. Environment variables
// 2. Config file from LOGPORT_CONFIG path
// 3. Inline config from LOGPORT_CONFIG_CONTENT
// 4. Default config files (./config.toml, ./.logport.toml)
// 5. Built-in defaults

use crate::{RetryPersistence, RuntimeConfig, StorageBackend, ENV_PREFIX};
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

pub fn load_config() -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();

    if let Some(file_config) = load_from_file()? {
        merge_config(&mut config, file_config);
    }

    apply_env_overrides(&mut config)?;

    config.validate()?;

    Ok(config)
}

fn load_from_file() -> Result<Option<RuntimeConfig>> {
    if let Ok(path) = env::var("LOGPORT_CONFIG") {
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file: {}", path))?;
        let config: RuntimeConfig = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path))?;
        return Ok(Some(config));
    }

    if let Ok(content) = env::var("LOGPORT_CONFIG_CONTENT") {
        let config: RuntimeConfig = toml::from_str(&content)
            .context("failed to parse inline config from LOGPORT_CONFIG_CONTENT")?;
        return Ok(Some(config));
    }

    for path in &["./config.toml", "./.logport.toml"] {
        if Path::new(path).exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file: {}", path))?;
            let config: RuntimeConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse config file: {}", path))?;
            return Ok(Some(config));
        }
    }

    Ok(None)
}

fn merge_config(base: &mut RuntimeConfig, file: RuntimeConfig) {
    base.coalescer = file.coalescer;
    base.stream = file.stream;
    base.worker = file.worker;
    base.retry = file.retry;
    base.storage = file.storage;
    base.server = file.server;
}

fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    // Coalescer
    if let Some(val) = get_env_usize("COALESCER_MAX_BATCH_SIZE")? {
        config.coalescer.max_batch_size = val;
    }
    if let Some(val) = get_env_u64("COALESCER_MAX_WAIT_MS")? {
        config.coalescer.max_wait_ms = val;
    }

    // Stream
    if let Some(val) = get_env_string("REDIS_URL")? {
        config.stream.redis_url = val;
    }
    if let Some(val) = get_env_string("STREAM_NAME")? {
        config.stream.stream_name = val;
    }
    if let Some(val) = get_env_string("CONSUMER_GROUP")? {
        config.stream.consumer_group = val;
    }
    if let Some(val) = get_env_usize("STREAM_MAX_LEN")? {
        config.stream.max_len = val;
    }

    // Worker
    if let Some(val) = get_env_string("INSTANCE_ID")? {
        config.worker.instance_id = val;
    }
    if let Some(val) = get_env_usize("WORKER_COUNT")? {
        config.worker.worker_count = val;
    }
    if let Some(val) = get_env_usize("WORKER_BATCH_SIZE")? {
        config.worker.batch_size = val;
    }
    if let Some(val) = get_env_usize("WORKER_MAX_BATCH_SIZE")? {
        config.worker.max_batch_size = val;
    }
    if let Some(val) = get_env_u64("WORKER_MAX_WAIT_MS")? {
        config.worker.max_wait_ms = val;
    }
    if let Some(val) = get_env_u64("WORKER_READ_BLOCK_MS")? {
        config.worker.read_block_ms = val;
    }
    if let Some(val) = get_env_u64("WORKER_CLAIM_MIN_IDLE_SECS")? {
        config.worker.claim_min_idle_secs = val;
    }
    if let Some(val) = get_env_u64("WORKER_CLAIM_INTERVAL_SECS")? {
        config.worker.claim_interval_secs = val;
    }
    if let Some(val) = get_env_u64("WORKER_HEARTBEAT_INTERVAL_SECS")? {
        config.worker.heartbeat_interval_secs = val;
    }
    if let Some(val) = get_env_usize("WORKER_RETRY_QUEUE_LIMIT")? {
        config.worker.retry_queue_limit = val;
    }

    // Retry
    if let Some(val) = get_env_string("RETRY_PERSISTENCE")? {
        config.retry.persistence = match val.to_lowercase().as_str() {
            "memory" => RetryPersistence::Memory,
            "sqlite" => RetryPersistence::Sqlite,
            "drop" => RetryPersistence::Drop,
            other => anyhow::bail!("LOGPORT_RETRY_PERSISTENCE: unknown value {:?}", other),
        };
    }
    if let Some(val) = get_env_string("RETRY_SQLITE_PATH")? {
        config.retry.sqlite_path = val;
    }
    if let Some(val) = get_env_u64("RETRY_MAX_ATTEMPTS")? {
        config.retry.max_attempts = val as u32;
    }
    if let Some(val) = get_env_u64("RETRY_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = val;
    }
    if let Some(val) = get_env_u64("RETRY_MAX_DELAY_MS")? {
        config.retry.max_delay_ms = val;
    }

    // Storage
    if let Some(val) = get_env_string("STORAGE_BACKEND")? {
        config.storage.backend = match val.to_lowercase().as_str() {
            "fs" => StorageBackend::Fs,
            "s3" => StorageBackend::S3,
            other => anyhow::bail!("LOGPORT_STORAGE_BACKEND: unknown value {:?}", other),
        };
    }
    if let Some(val) = get_env_string("STORAGE_FS_PATH")? {
        config.storage.fs_path = val;
    }
    if let Some(val) = get_env_string("STORAGE_S3_BUCKET")? {
        config.storage.s3_bucket = val;
    }
    if let Some(val) = get_env_string("STORAGE_S3_REGION")? {
        config.storage.s3_region = val;
    }
    if let Some(val) = get_env_string("STORAGE_S3_ENDPOINT")? {
        config.storage.s3_endpoint = Some(val);
    }

    // Server
    if let Some(val) = get_env_string("BIND_ADDR")? {
        config.server.bind_addr = val;
    }
    if let Some(val) = get_env_usize("MAX_PAYLOAD_BYTES")? {
        config.server.max_payload_bytes = val;
    }
    if let Some(val) = get_env_string("LOG_LEVEL")? {
        config.server.log_level = val;
    }
    if let Some(val) = get_env_string("LOG_FORMAT")? {
        config.server.log_format = match val.to_lowercase().as_str() {
            "json" => crate::LogFormat::Json,
            _ => crate::LogFormat::Text,
        };
    }

    Ok(())
}

fn get_env_string(key: &str) -> Result<Option<String>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match env::var(&full_key) {
        Ok(val) if !val.is_empty() => Ok(Some(val)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read env var {}", full_key)),
    }
}

fn get_env_usize(key: &str) -> Result<Option<usize>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .with_context(|| format!("{} must be a valid number", full_key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_u64(key: &str) -> Result<Option<u64>> {
    let full_key = format!("{}{}", ENV_PREFIX, key);
    match get_env_string(key)? {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .with_context(|| format!("{} must be a valid number", full_key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn inline_config_content_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LOGPORT_CONFIG");
        std::env::set_var(
            "LOGPORT_CONFIG_CONTENT",
            "[worker]\nworker_count = 9\n",
        );
        let config = load_config().expect("load_config should succeed");
        assert_eq!(config.worker.worker_count, 9);
        std::env::remove_var("LOGPORT_CONFIG_CONTENT");
    }

    #[test]
    fn env_override_beats_file_content() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::remove_var("LOGPORT_CONFIG");
        std::env::set_var("LOGPORT_CONFIG_CONTENT", "[worker]\nworker_count = 9\n");
        std::env::set_var("LOGPORT_WORKER_COUNT", "3");
        let config = load_config().expect("load_config should succeed");
        assert_eq!(config.worker.worker_count, 3);
        std::env::remove_var("LOGPORT_CONFIG_CONTENT");
        std::env::remove_var("LOGPORT_WORKER_COUNT");
    }
}
