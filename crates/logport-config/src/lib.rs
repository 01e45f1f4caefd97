//! logport-config - Layered configuration loading.
//!
//! Priority, highest to lowest, mirrors `otlp2parquet-config`'s
//! `sources.rs`: environment variable overrides, `LOGPORT_CONFIG` file
//! path, inline `LOGPORT_CONFIG_CONTENT`, `./config.toml` or
//! `./.logport.toml`, then built-in defaults.

mod sources;
mod validation;

use serde::{Deserialize, Serialize};

pub use sources::load_config;

const ENV_PREFIX: &str = "LOGPORT_";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub coalescer: CoalescerSection,
    pub stream: StreamSection,
    pub worker: WorkerSection,
    pub retry: RetrySection,
    pub storage: StorageSection,
    pub server: ServerSection,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            coalescer: CoalescerSection::default(),
            stream: StreamSection::default(),
            worker: WorkerSection::default(),
            retry: RetrySection::default(),
            storage: StorageSection::default(),
            server: ServerSection::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        validation::validate_config(self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoalescerSection {
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
}

impl Default for CoalescerSection {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            max_wait_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSection {
    pub redis_url: String,
    pub stream_name: String,
    pub consumer_group: String,
    pub max_len: usize,
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1/".to_string(),
            stream_name: "logport:entries".to_string(),
            consumer_group: "logport-workers".to_string(),
            max_len: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub instance_id: String,
    pub worker_count: usize,
    /// Messages requested per `StreamQueue::read` call.
    pub batch_size: usize,
    /// Buffer occupancy at which a worker flushes regardless of
    /// `max_wait_ms`.
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
    pub read_block_ms: u64,
    pub claim_min_idle_secs: u64,
    pub claim_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// Outstanding retry envelopes at which a worker pauses reading the
    /// stream. `0` disables the check.
    pub retry_queue_limit: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            instance_id: "logport".to_string(),
            worker_count: 4,
            batch_size: 200,
            max_batch_size: 200,
            max_wait_ms: 250,
            read_block_ms: 500,
            claim_min_idle_secs: 30,
            claim_interval_secs: 60,
            heartbeat_interval_secs: 5,
            retry_queue_limit: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryPersistence {
    Memory,
    Sqlite,
    Drop,
}

impl Default for RetryPersistence {
    fn default() -> Self {
        RetryPersistence::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub persistence: RetryPersistence,
    pub sqlite_path: String,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            persistence: RetryPersistence::Memory,
            sqlite_path: "./logport-retry.sqlite3".to_string(),
            max_attempts: 5,
            base_delay_ms: 500,
            max_delay_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Fs,
    S3,
}

impl Default for StorageBackend {
    fn default() -> Self {
        StorageBackend::Fs
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub backend: StorageBackend,
    pub fs_path: String,
    pub s3_bucket: String,
    pub s3_region: String,
    pub s3_endpoint: Option<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Fs,
            fs_path: "./data".to_string(),
            s3_bucket: String::new(),
            s3_region: "us-east-1".to_string(),
            s3_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        LogFormat::Text
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind_addr: String,
    pub max_payload_bytes: usize,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            max_payload_bytes: 10 * 1024 * 1024,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}
