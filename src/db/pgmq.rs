//! pgmq queue operations via direct SQLx.
//!
//! Each broker stream is a pgmq queue. Messages are
//! `{"key": <partition key>, "record": {..}}`.

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::sink::{Record, RecordSink};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

/// pgmq queue names allow only `[a-z0-9_]`; stream names like
/// `fluxnova-events` are mapped onto that alphabet.
pub fn queue_name(stream: &str) -> String {
    stream
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect()
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, stream: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name(stream))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    pub async fn send_to_queue(&self, stream: &str, payload: &serde_json::Value) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2)")
            .bind(queue_name(stream))
            .bind(payload)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Read the next message from a queue (visibility timeout in seconds).
    /// Returns None if the queue is empty.
    pub async fn read_from_queue(
        &self,
        stream: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >("SELECT msg_id, read_ct, enqueued_at, message FROM pgmq.read($1, $2, 1)")
        .bind(queue_name(stream))
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(msg_id, read_ct, enqueued_at, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            message,
        }))
    }
}

#[async_trait]
impl RecordSink for super::Db {
    async fn send(&self, stream: &str, record: &Record) -> Result<()> {
        let payload = serde_json::json!({
            "key": record.key,
            "record": record.fields,
        });
        match self.send_to_queue(stream, &payload).await {
            Ok(_) => {
                metrics::records_published().add(
                    1,
                    &[
                        KeyValue::new("stream", stream.to_string()),
                        KeyValue::new("result", "ok"),
                    ],
                );
                Ok(())
            }
            Err(e) => {
                metrics::records_published().add(
                    1,
                    &[
                        KeyValue::new("stream", stream.to_string()),
                        KeyValue::new("result", "error"),
                    ],
                );
                Err(Error::Publish {
                    stream: stream.to_string(),
                    key: record.key.clone(),
                    message: e.to_string(),
                })
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.close_pool().await;
        Ok(())
    }
}
