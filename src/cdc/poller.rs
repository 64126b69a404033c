//! Checkpointed history poller.
//!
//! Turns the engine's stateless history API into an ordered stream of
//! [`ProcessEvent`]s. Each cycle fetches up to `batch_size` process instances
//! started after the watermark, enriches each with its activity and variable
//! history, and returns the events together with the advanced watermark.
//!
//! The engine's `startedAfter` bound is inclusive, so the instances that
//! set the watermark come back on the next query. The poller remembers
//! their ids and drops them, paging past them with `firstResult` when a
//! whole page is made of them. That memory is not checkpointed: after a
//! restart the boundary instances are emitted once more. Delivery is
//! at-least-once and consumers upsert by process instance id.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::client::HistorySource;
use crate::client::history::{HistoricProcessInstance, HistoricVariableInstance};
use crate::error::Result;
use crate::model::{ActivityRecord, ProcessEvent, TypedValue, Variables, Watermark};
use crate::telemetry::metrics;

/// Output of one poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBatch {
    /// Ordered by process start time, ascending.
    pub events: Vec<ProcessEvent>,
    /// Watermark to resume from: the maximum start time emitted, or the
    /// input watermark if nothing was emitted.
    pub watermark: Watermark,
}

pub struct Poller {
    source: Arc<dyn HistorySource>,
    batch_size: usize,
    watermark: Watermark,
    /// Ids already emitted whose start time equals the watermark.
    boundary: HashSet<String>,
}

impl Poller {
    pub fn new(source: Arc<dyn HistorySource>, batch_size: usize) -> Self {
        Self {
            source,
            batch_size: batch_size.max(1),
            watermark: Watermark::empty(),
            boundary: HashSet::new(),
        }
    }

    /// Current watermark held by this poller.
    pub fn checkpoint(&self) -> Watermark {
        self.watermark
    }

    /// Restore or reset the watermark (e.g. from a persisted checkpoint).
    /// This is the only way the watermark moves backwards.
    pub fn set_checkpoint(&mut self, watermark: Watermark) {
        self.watermark = watermark;
        self.boundary.clear();
    }

    /// Poll from the held watermark and advance it once the whole batch is
    /// built. Instances already emitted at the watermark are not emitted
    /// again.
    pub async fn poll(&mut self) -> Result<Vec<ProcessEvent>> {
        let batch = self.fetch(self.watermark, &self.boundary).await?;

        let next = self.watermark.advance(batch.watermark);
        if next != self.watermark {
            self.boundary.clear();
        }
        if let Some(t) = next.as_time() {
            self.boundary.extend(
                batch
                    .events
                    .iter()
                    .filter(|e| e.start_time == t)
                    .map(|e| e.process_instance_id.clone()),
            );
        }
        self.watermark = next;
        Ok(batch.events)
    }

    /// Poll starting at `from` without touching the held watermark. Nothing
    /// is filtered: instances starting exactly at `from` are returned if the
    /// engine returns them.
    ///
    /// Fails only if the instance query itself fails. Per-instance activity
    /// and variable sub-queries that fail are logged and yield an empty set.
    pub async fn poll_from(&self, from: Watermark) -> Result<PollBatch> {
        self.fetch(from, &HashSet::new()).await
    }

    async fn fetch(&self, from: Watermark, seen: &HashSet<String>) -> Result<PollBatch> {
        let instances = self.unseen_instances(from, seen).await?;

        if instances.is_empty() {
            return Ok(PollBatch {
                events: Vec::new(),
                watermark: from,
            });
        }

        let observed_at = Utc::now();
        let mut events = Vec::with_capacity(instances.len());
        let mut high = from;

        for instance in instances {
            let id = instance.id.clone();
            let (activities, variables) = tokio::join!(
                self.activities_for(&id),
                self.variables_for(&id),
            );

            match ProcessEvent::from_history(instance, activities, variables, observed_at) {
                Ok(event) => {
                    high = high.observe(event.start_time);
                    events.push(event);
                }
                Err(e) => {
                    warn!(process_instance_id = %id, error = %e, "skipping process instance with unparsable timestamps");
                    metrics::subquery_failures().add(1, &[KeyValue::new("kind", "instance")]);
                }
            }
        }

        // The engine sorts by start time already; a stable sort keeps its
        // tie order.
        events.sort_by_key(|e| e.start_time);

        debug!(count = events.len(), from = %from, to = %high, "poll cycle built");
        Ok(PollBatch {
            events,
            watermark: high,
        })
    }

    /// First page of instances after `from` that are not in `seen`. A full
    /// page holding only seen ids is skipped with `firstResult`.
    async fn unseen_instances(
        &self,
        from: Watermark,
        seen: &HashSet<String>,
    ) -> Result<Vec<HistoricProcessInstance>> {
        let mut offset = 0;
        loop {
            let page = self
                .source
                .process_instances(from.as_time(), offset, self.batch_size)
                .await?;
            let fetched = page.len();
            let unseen: Vec<_> = page.into_iter().filter(|i| !seen.contains(&i.id)).collect();
            if !unseen.is_empty() || fetched < self.batch_size {
                return Ok(unseen);
            }
            debug!(offset, fetched, watermark = %from, "page holds only emitted boundary instances");
            offset += fetched;
        }
    }

    async fn activities_for(&self, process_instance_id: &str) -> Vec<ActivityRecord> {
        match self.source.activity_instances(process_instance_id).await {
            Ok(raw) => raw
                .into_iter()
                .filter_map(|a| {
                    let activity_instance_id = a.id.clone();
                    ActivityRecord::from_history(a)
                        .map_err(|e| {
                            warn!(process_instance_id, activity_instance_id, error = %e, "dropping malformed activity");
                        })
                        .ok()
                })
                .collect(),
            Err(e) => {
                warn!(process_instance_id, error = %e, "failed to fetch activities");
                metrics::subquery_failures().add(1, &[KeyValue::new("kind", "activities")]);
                Vec::new()
            }
        }
    }

    async fn variables_for(&self, process_instance_id: &str) -> Variables {
        match self.source.variable_instances(process_instance_id).await {
            Ok(raw) => collect_variables(process_instance_id, raw),
            Err(e) => {
                warn!(process_instance_id, error = %e, "failed to fetch variables");
                metrics::subquery_failures().add(1, &[KeyValue::new("kind", "variables")]);
                Variables::new()
            }
        }
    }
}

/// Name → last-known value. Variables whose value does not match their
/// declared type are dropped.
fn collect_variables(process_instance_id: &str, raw: Vec<HistoricVariableInstance>) -> Variables {
    let mut vars = Variables::new();
    for v in raw {
        match TypedValue::decode(v.type_name.as_deref(), v.value) {
            Ok(value) => {
                vars.insert(v.name, value);
            }
            Err(e) => {
                warn!(process_instance_id, variable = %v.name, error = %e, "dropping malformed variable");
            }
        }
    }
    vars
}
