//! History endpoints: process, activity and variable instances, and the
//! detail (audit log) query.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::EngineClient;
use crate::error::Result;
use crate::model::format_engine_time;

/// A completed or running process instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricProcessInstance {
    pub id: String,
    pub business_key: Option<String>,
    #[serde(default)]
    pub process_definition_id: String,
    #[serde(default)]
    pub process_definition_key: String,
    pub process_definition_name: Option<String>,
    pub process_definition_version: Option<i32>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_in_millis: Option<i64>,
    pub start_user_id: Option<String>,
    pub start_activity_id: Option<String>,
    pub delete_reason: Option<String>,
    pub super_process_instance_id: Option<String>,
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub state: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricActivityInstance {
    pub id: String,
    pub parent_activity_instance_id: Option<String>,
    #[serde(default)]
    pub activity_id: String,
    pub activity_name: Option<String>,
    #[serde(default)]
    pub activity_type: String,
    #[serde(default)]
    pub process_definition_key: String,
    #[serde(default)]
    pub process_definition_id: String,
    #[serde(default)]
    pub process_instance_id: String,
    #[serde(default)]
    pub execution_id: String,
    pub task_id: Option<String>,
    pub assignee: Option<String>,
    pub called_process_instance_id: Option<String>,
    pub called_case_instance_id: Option<String>,
    pub start_time: String,
    pub end_time: Option<String>,
    pub duration_in_millis: Option<i64>,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub complete_scope: bool,
    pub tenant_id: Option<String>,
}

/// Last known value of a process variable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricVariableInstance {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: Option<String>,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub process_definition_id: String,
    #[serde(default)]
    pub process_instance_id: String,
    pub execution_id: Option<String>,
    pub activity_instance_id: Option<String>,
    pub task_id: Option<String>,
    pub create_time: Option<String>,
    pub state: Option<String>,
    pub tenant_id: Option<String>,
}

/// One audit-log entry (variable update, form field, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricDetail {
    pub id: String,
    #[serde(rename = "type")]
    pub detail_type: String,
    #[serde(default)]
    pub process_instance_id: String,
    pub activity_instance_id: Option<String>,
    pub task_id: Option<String>,
    pub time: String,
    pub variable_name: Option<String>,
    pub variable_type: Option<String>,
    #[serde(default)]
    pub value: Value,
    pub revision: Option<i32>,
}

impl EngineClient {
    /// Process instances started after `started_after`, sorted ascending by
    /// start time, one page of `max_results` from offset `first_result`.
    pub async fn historic_process_instances(
        &self,
        started_after: Option<DateTime<Utc>>,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<HistoricProcessInstance>> {
        let mut query = vec![
            ("sortBy", "startTime".to_string()),
            ("sortOrder", "asc".to_string()),
            ("firstResult", first_result.to_string()),
            ("maxResults", max_results.to_string()),
        ];
        if let Some(t) = started_after {
            query.push(("startedAfter", format_engine_time(t)));
        }
        self.get("/history/process-instance", &query).await
    }

    pub async fn historic_activity_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricActivityInstance>> {
        self.get(
            "/history/activity-instance",
            &[
                ("processInstanceId", process_instance_id.to_string()),
                ("sortBy", "startTime".to_string()),
                ("sortOrder", "asc".to_string()),
            ],
        )
        .await
    }

    pub async fn historic_variable_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricVariableInstance>> {
        self.get(
            "/history/variable-instance",
            &[("processInstanceId", process_instance_id.to_string())],
        )
        .await
    }

    /// Audit log for a process, ascending by time.
    pub async fn historic_details(&self, process_instance_id: &str) -> Result<Vec<HistoricDetail>> {
        self.get(
            "/history/detail",
            &[
                ("processInstanceId", process_instance_id.to_string()),
                ("sortBy", "time".to_string()),
                ("sortOrder", "asc".to_string()),
            ],
        )
        .await
    }
}
