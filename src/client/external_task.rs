//! External-task endpoints: fetch-and-lock, complete, failure.

use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use super::EngineClient;
use crate::error::Result;
use crate::model::LeasedTask;
use crate::model::task::ExternalTaskDto;
use crate::model::variable::{Variables, WireVariable, encode_variables};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchAndLockRequest {
    pub worker_id: String,
    pub max_tasks: usize,
    pub use_priority: bool,
    /// Order matters: the engine fills the batch topic by topic.
    pub topics: Vec<TopicSubscription>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscription {
    pub topic_name: String,
    /// Lease length in milliseconds.
    pub lock_duration: u64,
}

impl TopicSubscription {
    pub fn new(topic_name: impl Into<String>, lock_duration: Duration) -> Self {
        Self {
            topic_name: topic_name.into(),
            lock_duration: u64::try_from(lock_duration.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteRequest {
    pub worker_id: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, WireVariable>,
}

impl CompleteRequest {
    pub fn new(worker_id: &str, variables: &Variables) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            variables: encode_variables(variables),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRequest {
    pub worker_id: String,
    pub error_message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
    pub retries: u32,
    pub retry_timeout: u64,
}

impl FailureRequest {
    /// Single-attempt failure: no engine-side retry.
    pub fn final_failure(worker_id: &str, message: &str, details: Option<String>) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            error_message: message.to_string(),
            error_details: details,
            retries: 0,
            retry_timeout: 0,
        }
    }
}

impl EngineClient {
    pub async fn fetch_and_lock_tasks(
        &self,
        request: &FetchAndLockRequest,
    ) -> Result<Vec<LeasedTask>> {
        let tasks: Vec<ExternalTaskDto> = self.post("/external-task/fetchAndLock", request).await?;
        Ok(tasks.into_iter().map(LeasedTask::from).collect())
    }

    pub async fn complete_task(&self, task_id: &str, request: &CompleteRequest) -> Result<()> {
        self.post_no_content(&format!("/external-task/{task_id}/complete"), request)
            .await?;
        info!(task_id, "completed task");
        Ok(())
    }

    pub async fn fail_task(&self, task_id: &str, request: &FailureRequest) -> Result<()> {
        self.post_no_content(&format!("/external-task/{task_id}/failure"), request)
            .await?;
        info!(task_id, "reported failure for task");
        Ok(())
    }
}
