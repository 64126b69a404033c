//! Event publisher.
//!
//! Each [`ProcessEvent`] becomes one record on the processes stream keyed by
//! process instance id, and one record per activity on the events stream
//! keyed by activity instance id. Every record is sent on its own, up to
//! `max_in_flight` at once: a failure is retried a bounded number of times,
//! then reported in the [`PublishReport`] without delaying its siblings.
//! No two records of one cycle share a key, so they carry no relative order.

use futures::StreamExt as _;
use futures::stream;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::BrokerConfig;
use crate::error::Result;
use crate::model::variable::variables_to_json;
use crate::model::{ActivityRecord, ProcessEvent, Variables, rfc3339};
use crate::sink::{Record, RecordSink};

/// Logical stream names on the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Streams {
    pub processes: String,
    pub events: String,
}

impl Streams {
    pub fn from_config(config: &BrokerConfig) -> Self {
        Self {
            processes: config.processes_stream.clone(),
            events: config.events_stream.clone(),
        }
    }
}

impl Default for Streams {
    fn default() -> Self {
        Self {
            processes: "fluxnova-processes".to_string(),
            events: "fluxnova-events".to_string(),
        }
    }
}

/// Outcome of publishing one cycle's events.
#[derive(Debug, Default)]
pub struct PublishReport {
    pub processes_sent: usize,
    pub events_sent: usize,
    /// One entry per record that could not be delivered after all attempts.
    pub failures: Vec<crate::error::Error>,
}

impl PublishReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
enum StreamKind {
    Processes,
    Events,
}

pub struct Publisher {
    sink: Arc<dyn RecordSink>,
    streams: Streams,
    attempts: u32,
    backoff: Duration,
    max_in_flight: usize,
}

impl Publisher {
    pub fn new(sink: Arc<dyn RecordSink>, streams: Streams) -> Self {
        Self {
            sink,
            streams,
            attempts: 3,
            backoff: Duration::from_millis(200),
            max_in_flight: 16,
        }
    }

    /// Records sent concurrently (at least one).
    #[must_use]
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// Total send attempts per record (at least one).
    #[must_use]
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts.max(1);
        self
    }

    /// Base delay between attempts; doubles after each failure.
    #[must_use]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn streams(&self) -> &Streams {
        &self.streams
    }

    pub async fn publish(&self, events: &[ProcessEvent]) -> PublishReport {
        let records: Vec<_> = events.iter().flat_map(|event| {
            std::iter::once((StreamKind::Processes, process_record(event))).chain(
                event
                    .activities
                    .iter()
                    .map(|a| (StreamKind::Events, activity_record(a, &event.variables))),
            )
        }).collect();

        let outcomes: Vec<_> = stream::iter(records)
            .map(|(kind, record)| async move {
                let stream = match kind {
                    StreamKind::Processes => &self.streams.processes,
                    StreamKind::Events => &self.streams.events,
                };
                (kind, self.send_with_retry(stream, &record).await)
            })
            .buffer_unordered(self.max_in_flight)
            .collect()
            .await;

        let mut report = PublishReport::default();
        for (kind, outcome) in outcomes {
            match (kind, outcome) {
                (StreamKind::Processes, Ok(())) => report.processes_sent += 1,
                (StreamKind::Events, Ok(())) => report.events_sent += 1,
                (_, Err(e)) => report.failures.push(e),
            }
        }

        debug!(
            processes = report.processes_sent,
            events = report.events_sent,
            failures = report.failures.len(),
            "published cycle"
        );
        report
    }

    /// Flush and release the underlying sink.
    pub async fn close(&self) -> Result<()> {
        self.sink.close().await
    }

    async fn send_with_retry(&self, stream: &str, record: &Record) -> Result<()> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match self.sink.send(stream, record).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < self.attempts => {
                    warn!(stream, key = %record.key, attempt, error = %e, "publish failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => {
                    warn!(stream, key = %record.key, attempt, error = %e, "giving up on record");
                    return Err(e);
                }
            }
        }
    }
}

/// Record for the processes stream. `_valid_from` is the process start time.
pub fn process_record(event: &ProcessEvent) -> Record {
    Record::new(&event.process_instance_id)
        .field("_id", &event.process_instance_id)
        .field("process_instance_id", &event.process_instance_id)
        .field("process_definition_key", &event.process_definition_key)
        .field("process_definition_id", &event.process_definition_id)
        .field("business_key", &event.business_key)
        .field("tenant_id", &event.tenant_id)
        .field("state", event.state())
        .field("engine_state", &event.engine_state)
        .field("start_time", rfc3339(event.start_time))
        .field("end_time", event.end_time().map(rfc3339))
        .field("duration_millis", event.duration_ms())
        .field("variables", variables_to_json(&event.variables))
        .field("observed_at", rfc3339(event.observed_at))
        .field("_valid_from", rfc3339(event.start_time))
}

/// Record for the events stream. The parent's variables ride along as a
/// serialized JSON string so consumers get decision context without a join.
pub fn activity_record(activity: &ActivityRecord, process_variables: &Variables) -> Record {
    let variables =
        (!process_variables.is_empty()).then(|| variables_to_json(process_variables).to_string());

    Record::new(&activity.activity_instance_id)
        .field("_id", &activity.activity_instance_id)
        .field("process_instance_id", &activity.process_instance_id)
        .field("activity_id", &activity.activity_id)
        .field("activity_name", &activity.activity_name)
        .field("activity_type", &activity.activity_type)
        .field("execution_id", &activity.execution_id)
        .field("task_id", &activity.task_id)
        .field("assignee", &activity.assignee)
        .field("start_time", rfc3339(activity.start_time))
        .field("end_time", activity.end_time.map(rfc3339))
        .field("duration_millis", activity.duration_ms)
        .field("canceled", activity.canceled)
        .field("process_variables", variables)
        .field("_valid_from", rfc3339(activity.start_time))
}
