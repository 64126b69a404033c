//! Process snapshots and activity records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Variables, parse_engine_time};
use crate::client::history::{HistoricActivityInstance, HistoricProcessInstance};
use crate::error::Result;

/// Lifecycle state as published downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcessState {
    Active,
    Completed,
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Active => write!(f, "ACTIVE"),
            ProcessState::Completed => write!(f, "COMPLETED"),
        }
    }
}

/// End time and duration exist exactly when the process has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Active,
    Completed {
        end_time: DateTime<Utc>,
        duration_ms: i64,
    },
}

/// One process-instance execution snapshot observed on a poll cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessEvent {
    pub process_instance_id: String,
    pub process_definition_key: String,
    pub process_definition_id: String,
    pub business_key: Option<String>,
    /// State string exactly as the engine reported it (e.g. `SUSPENDED`).
    pub engine_state: String,
    pub lifecycle: Lifecycle,
    pub start_time: DateTime<Utc>,
    pub tenant_id: Option<String>,
    pub variables: Variables,
    /// Ordered by activity start time.
    pub activities: Vec<ActivityRecord>,
    /// Wall-clock time the poller produced this snapshot.
    pub observed_at: DateTime<Utc>,
}

/// One activity execution within a process.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRecord {
    pub activity_instance_id: String,
    pub process_instance_id: String,
    pub activity_id: String,
    pub activity_name: Option<String>,
    pub activity_type: String,
    pub execution_id: String,
    pub task_id: Option<String>,
    pub assignee: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub canceled: bool,
}

impl ProcessEvent {
    /// Build a snapshot from the engine's history records.
    ///
    /// Fails with a decode error only if the instance's own timestamps are
    /// unparsable; the activity and variable sets are taken as given.
    pub fn from_history(
        instance: HistoricProcessInstance,
        activities: Vec<ActivityRecord>,
        variables: Variables,
        observed_at: DateTime<Utc>,
    ) -> Result<Self> {
        let start_time = parse_engine_time(&instance.start_time)?;
        let lifecycle = match instance.end_time.as_deref() {
            Some(end) => {
                let end_time = parse_engine_time(end)?;
                let duration_ms = instance
                    .duration_in_millis
                    .unwrap_or_else(|| (end_time - start_time).num_milliseconds());
                Lifecycle::Completed {
                    end_time,
                    duration_ms,
                }
            }
            None => Lifecycle::Active,
        };

        Ok(Self {
            process_instance_id: instance.id,
            process_definition_key: instance.process_definition_key,
            process_definition_id: instance.process_definition_id,
            business_key: instance.business_key,
            engine_state: instance.state,
            lifecycle,
            start_time,
            tenant_id: instance.tenant_id,
            variables,
            activities,
            observed_at,
        })
    }

    pub fn state(&self) -> ProcessState {
        match self.lifecycle {
            Lifecycle::Active => ProcessState::Active,
            Lifecycle::Completed { .. } => ProcessState::Completed,
        }
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        match self.lifecycle {
            Lifecycle::Completed { end_time, .. } => Some(end_time),
            Lifecycle::Active => None,
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match self.lifecycle {
            Lifecycle::Completed { duration_ms, .. } => Some(duration_ms),
            Lifecycle::Active => None,
        }
    }
}

impl ActivityRecord {
    pub fn from_history(activity: HistoricActivityInstance) -> Result<Self> {
        let start_time = parse_engine_time(&activity.start_time)?;
        let end_time = activity
            .end_time
            .as_deref()
            .map(parse_engine_time)
            .transpose()?;
        Ok(Self {
            activity_instance_id: activity.id,
            process_instance_id: activity.process_instance_id,
            activity_id: activity.activity_id,
            activity_name: activity.activity_name,
            activity_type: activity.activity_type,
            execution_id: activity.execution_id,
            task_id: activity.task_id,
            assignee: activity.assignee,
            start_time,
            end_time,
            duration_ms: activity.duration_in_millis,
            canceled: activity.canceled,
        })
    }
}
