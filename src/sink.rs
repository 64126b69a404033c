//! Broker-facing record sink.
//!
//! A record is a flat JSON object with at least `_id` and `_valid_from`,
//! addressed to a named stream and partitioned by `key`. Ordering is only
//! guaranteed per key.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Partition key.
    pub key: String,
    pub fields: Map<String, Value>,
}

impl Record {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: Map::new(),
        }
    }

    /// Set a field. `None`-valued options serialize as JSON null, and so
    /// does a value that fails to serialize (logged).
    #[must_use]
    pub fn field(mut self, name: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or_else(|e| {
            warn!(key = %self.key, field = name, error = %e, "field not serializable, writing null");
            Value::Null
        });
        self.fields.insert(name.to_string(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Destination for published records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn send(&self, stream: &str, record: &Record) -> Result<()>;

    /// Flush buffered records and release the transport.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Sink that only logs records. Used when no broker is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl RecordSink for LogSink {
    async fn send(&self, stream: &str, record: &Record) -> Result<()> {
        let body = serde_json::to_string(&record.fields)?;
        info!(stream, key = %record.key, record = %body, "record");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_fields_and_nulls() {
        let r = Record::new("p1")
            .field("_id", "p1")
            .field("business_key", None::<String>)
            .field("duration_millis", Some(1500));
        assert_eq!(r.get("_id"), Some(&json!("p1")));
        assert_eq!(r.get("business_key"), Some(&Value::Null));
        assert_eq!(r.get("duration_millis"), Some(&json!(1500)));
    }

    #[test]
    fn unserializable_field_becomes_null() {
        let mut tuple_keyed = std::collections::BTreeMap::new();
        tuple_keyed.insert((1u8, 2u8), "pair");
        let r = Record::new("p1").field("_id", "p1").field("scores", tuple_keyed);
        assert_eq!(r.get("scores"), Some(&Value::Null));
        assert_eq!(r.get("_id"), Some(&json!("p1")));
    }
}
