use std::time::Duration;

use async_trait::async_trait;
use logport_core::IngestError;
use redis::aio::ConnectionManager;
use redis::streams::{
    StreamAutoClaimOptions, StreamAutoClaimReply, StreamReadOptions, StreamReadReply,
};
use redis::{AsyncCommands, RedisError};

use crate::envelope::StreamEnvelope;
use crate::queue::{StreamMessage, StreamMessageId, StreamQueue};

/// Field name under which the JSON-encoded `StreamEnvelope` is stored
/// in each Redis stream entry.
const DATA_FIELD: &str = "data";

fn to_ingest_error(context: &str, err: RedisError) -> IngestError {
    IngestError::TransientDownstream(format!("{context}: {err}"))
}

#[derive(Debug, Clone)]
pub struct RedisStreamConfig {
    pub stream_name: String,
    pub consumer_group: String,
    /// Approximate cap applied via `XTRIM ~ MAXLEN` after each append.
    pub max_len: usize,
}

/// Production `StreamQueue` backed by Redis Streams.
///
/// Mirrors the consumer-group lifecycle of the `stream-worker` reference
/// crate: `XGROUP CREATE ... MKSTREAM` tolerating `BUSYGROUP`,
/// `XREADGROUP` for new messages, `XAUTOCLAIM` for stalled-delivery
/// recovery, `XACK` on success, approximate `XTRIM` to cap growth.
pub struct RedisStreamQueue {
    conn: ConnectionManager,
    config: RedisStreamConfig,
}

impl RedisStreamQueue {
    pub fn new(conn: ConnectionManager, config: RedisStreamConfig) -> Self {
        Self { conn, config }
    }
}

#[async_trait]
impl StreamQueue for RedisStreamQueue {
    async fn initialize(&self) -> Result<(), IngestError> {
        let mut conn = self.conn.clone();
        let result: Result<(), RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(to_ingest_error("initializing consumer group", e)),
        }
    }

    async fn append(&self, envelope: StreamEnvelope) -> Result<StreamMessageId, IngestError> {
        let payload = serde_json::to_string(&envelope).map_err(|e| {
            IngestError::Validation(format!("failed to serialize stream envelope: {e}"))
        })?;

        let mut conn = self.conn.clone();
        let id: String = conn
            .xadd(&self.config.stream_name, "*", &[(DATA_FIELD, payload)])
            .await
            .map_err(|e| to_ingest_error("appending to stream", e))?;

        if self.config.max_len > 0 {
            let _: Result<i64, RedisError> = redis::cmd("XTRIM")
                .arg(&self.config.stream_name)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_len)
                .query_async(&mut conn)
                .await;
        }

        Ok(StreamMessageId(id))
    }

    async fn append_batch(
        &self,
        envelopes: Vec<StreamEnvelope>,
    ) -> Result<Vec<StreamMessageId>, IngestError> {
        if envelopes.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for envelope in &envelopes {
            let payload = serde_json::to_string(envelope).map_err(|e| {
                IngestError::Validation(format!("failed to serialize stream envelope: {e}"))
            })?;
            pipe.cmd("XADD")
                .arg(&self.config.stream_name)
                .arg("*")
                .arg(DATA_FIELD)
                .arg(payload);
        }

        let mut conn = self.conn.clone();
        let ids: Vec<String> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| to_ingest_error("appending batch to stream", e))?;

        if self.config.max_len > 0 {
            let _: Result<i64, RedisError> = redis::cmd("XTRIM")
                .arg(&self.config.stream_name)
                .arg("MAXLEN")
                .arg("~")
                .arg(self.config.max_len)
                .query_async(&mut conn)
                .await;
        }

        Ok(ids.into_iter().map(StreamMessageId).collect())
    }

    async fn read(
        &self,
        consumer: &str,
        count: usize,
        block: Duration,
    ) -> Result<Vec<StreamMessage>, IngestError> {
        let mut conn = self.conn.clone();
        let opts = StreamReadOptions::default()
            .group(&self.config.consumer_group, consumer)
            .count(count)
            .block(block.as_millis() as usize);

        let reply: StreamReadReply = conn
            .xread_options(&[&self.config.stream_name], &[">"], &opts)
            .await
            .map_err(|e| to_ingest_error("reading new messages", e))?;

        Ok(parse_reply(reply))
    }

    async fn recover_pending(
        &self,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> Result<Vec<StreamMessage>, IngestError> {
        let mut conn = self.conn.clone();
        let opts = StreamAutoClaimOptions::default().count(count);

        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.config.stream_name,
                &self.config.consumer_group,
                consumer,
                min_idle.as_millis() as usize,
                "0",
                opts,
            )
            .await
            .map_err(|e| to_ingest_error("reclaiming pending messages", e))?;

        let mut out = Vec::with_capacity(reply.claimed.len());
        for stream_id in reply.claimed {
            let Some(envelope) = decode_fields(&stream_id.map) else {
                continue;
            };
            out.push(StreamMessage {
                id: StreamMessageId(stream_id.id),
                envelope,
                delivery_count: 2,
            });
        }
        Ok(out)
    }

    async fn ack(&self, ids: &[StreamMessageId]) -> Result<(), IngestError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let raw_ids: Vec<&str> = ids.iter().map(|id| id.0.as_str()).collect();
        let _: i64 = conn
            .xack(&self.config.stream_name, &self.config.consumer_group, &raw_ids)
            .await
            .map_err(|e| to_ingest_error("acking messages", e))?;
        Ok(())
    }

    async fn pending_count(&self) -> Result<u64, IngestError> {
        let mut conn = self.conn.clone();
        let summary: redis::streams::StreamPendingReply = conn
            .xpending(&self.config.stream_name, &self.config.consumer_group)
            .await
            .map_err(|e| to_ingest_error("querying pending count", e))?;

        Ok(match summary {
            redis::streams::StreamPendingReply::Empty => 0,
            redis::streams::StreamPendingReply::Data(data) => data.count as u64,
        })
    }
}

fn parse_reply(reply: StreamReadReply) -> Vec<StreamMessage> {
    let mut out = Vec::new();
    for key in reply.keys {
        for id in key.ids {
            if let Some(envelope) = decode_fields(&id.map) {
                out.push(StreamMessage {
                    id: StreamMessageId(id.id),
                    envelope,
                    delivery_count: 1,
                });
            }
        }
    }
    out
}

fn decode_fields(
    fields: &std::collections::HashMap<String, redis::Value>,
) -> Option<StreamEnvelope> {
    let raw = fields.get(DATA_FIELD)?;
    let bytes: Vec<u8> = match raw {
        redis::Value::BulkString(b) => b.clone(),
        redis::Value::SimpleString(s) => s.clone().into_bytes(),
        _ => return None,
    };
    serde_json::from_slice(&bytes).ok()
}
