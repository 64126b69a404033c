//! Static topic → handler registry, resolved once at startup.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use super::schema::{TaskInput, TopicSchema};
use crate::client::external_task::TopicSubscription;
use crate::error::{Error, Result};
use crate::model::{LeasedTask, TypedValue, Variables};
use crate::sink::Record;

/// Business logic for one topic.
///
/// Handlers must finish well within the lock duration: leases are not
/// renewed, and an overrun task may be handed to another worker.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Topic this handler serves, with the variables it reads.
    fn schema(&self) -> TopicSchema;

    async fn handle(&self, task: &LeasedTask, input: TaskInput) -> Result<TaskOutput>;
}

/// What a handler hands back on success.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    /// Written back to the process on completion.
    pub variables: Variables,
    /// Decision context, published to the decisions stream.
    pub decision: Option<Record>,
}

impl TaskOutput {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn variable(mut self, name: &str, value: TypedValue) -> Self {
        self.variables.insert(name.to_string(), value);
        self
    }

    /// Store `value` as a serialized JSON document in a string variable,
    /// readable by engines without a JSON type plugin.
    pub fn json_variable(self, name: &str, value: &impl Serialize) -> Result<Self> {
        let body = serde_json::to_string(value)
            .map_err(|e| Error::Handler(format!("cannot serialize {name}: {e}")))?;
        Ok(self.variable(name, TypedValue::String(body)))
    }

    #[must_use]
    pub fn with_decision(mut self, record: Record) -> Self {
        self.decision = Some(record);
        self
    }
}

struct Entry {
    schema: TopicSchema,
    handler: Arc<dyn TaskHandler>,
}

/// Registry of handlers keyed by topic name. Iteration order is the topic
/// order used for fetch-and-lock subscriptions.
#[derive(Default)]
pub struct HandlerRegistry {
    entries: BTreeMap<String, Entry>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its schema's topic. A second handler for the
    /// same topic replaces the first.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> &mut Self {
        let schema = handler.schema();
        self.entries
            .insert(schema.topic().to_string(), Entry { schema, handler });
        self
    }

    pub fn get(&self, topic: &str) -> Option<(&TopicSchema, Arc<dyn TaskHandler>)> {
        self.entries
            .get(topic)
            .map(|e| (&e.schema, Arc::clone(&e.handler)))
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn topics(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Subscriptions for every registered topic, all with the same lease.
    pub fn subscriptions(&self, lock_duration: Duration) -> Vec<TopicSubscription> {
        self.entries
            .keys()
            .map(|topic| TopicSubscription::new(topic.clone(), lock_duration))
            .collect()
    }
}
