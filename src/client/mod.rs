//! Workflow engine REST client.
//!
//! Pull-only reads over process/activity/variable history, plus the
//! external-task endpoints (fetch-and-lock, complete, failure). The
//! [`HistorySource`] and [`TaskEndpoint`] traits are the seams the poller
//! and dispatcher are written against; [`EngineClient`] implements both.

pub mod external_task;
pub mod history;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::model::LeasedTask;
use external_task::{CompleteRequest, FailureRequest, FetchAndLockRequest};
use history::{HistoricActivityInstance, HistoricProcessInstance, HistoricVariableInstance};

/// Read access to the engine's history, as consumed by the poller.
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// Verify the engine is reachable.
    async fn ping(&self) -> Result<()>;

    /// Process instances started after `started_after`, ascending by start
    /// time, skipping the first `first_result` and returning at most
    /// `max_results`.
    async fn process_instances(
        &self,
        started_after: Option<DateTime<Utc>>,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<HistoricProcessInstance>>;

    async fn activity_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricActivityInstance>>;

    async fn variable_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricVariableInstance>>;
}

/// External-task lease operations, as consumed by the dispatcher.
#[async_trait]
pub trait TaskEndpoint: Send + Sync {
    async fn fetch_and_lock(&self, request: &FetchAndLockRequest) -> Result<Vec<LeasedTask>>;

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> Result<()>;

    async fn report_failure(&self, task_id: &str, request: &FailureRequest) -> Result<()>;
}

/// HTTP client for a Fluxnova / Camunda 7 engine.
pub struct EngineClient {
    base_url: String,
    http: reqwest::Client,
    auth: Option<(String, SecretString)>,
}

impl EngineClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            auth: None,
        })
    }

    /// Build from configuration. Basic auth is used only when both username
    /// and password are set.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let client = Self::new(&config.base_url, config.request_timeout)?;
        Ok(match (&config.username, &config.password) {
            (Some(user), Some(password)) => {
                client.with_basic_auth(user, SecretString::from(password.expose_secret().to_string()))
            }
            _ => client,
        })
    }

    pub fn with_basic_auth(mut self, username: &str, password: SecretString) -> Self {
        self.auth = Some((username.to_string(), password));
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self
            .http
            .request(method, url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.auth {
            Some((user, password)) => builder.basic_auth(user, Some(password.expose_secret())),
            None => builder,
        }
    }

    pub(crate) async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        debug!(path, "engine GET");
        let response = self
            .request(reqwest::Method::GET, path)
            .query(query)
            .send()
            .await?;
        decode(check_status(response).await?).await
    }

    pub(crate) async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        debug!(path, "engine POST");
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        decode(check_status(response).await?).await
    }

    /// POST where the engine answers 204 No Content on success.
    pub(crate) async fn post_no_content<B: Serialize>(&self, path: &str, body: &B) -> Result<()> {
        debug!(path, "engine POST");
        let response = self
            .request(reqwest::Method::POST, path)
            .json(body)
            .send()
            .await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(Error::Transport {
        message: format!("engine API error {}: {}", status.as_u16(), body.trim()),
        status: Some(status.as_u16()),
    })
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    if response.status() == StatusCode::NO_CONTENT {
        return Err(Error::Decode("expected a response body, got 204".to_string()));
    }
    // Read the body first so a malformed payload is a decode error, not a
    // transport error.
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(Error::from)
}

#[async_trait]
impl HistorySource for EngineClient {
    async fn ping(&self) -> Result<()> {
        let response = self.request(reqwest::Method::GET, "/engine").send().await?;
        check_status(response).await?;
        Ok(())
    }

    async fn process_instances(
        &self,
        started_after: Option<DateTime<Utc>>,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<HistoricProcessInstance>> {
        self.historic_process_instances(started_after, first_result, max_results)
            .await
    }

    async fn activity_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricActivityInstance>> {
        self.historic_activity_instances(process_instance_id).await
    }

    async fn variable_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricVariableInstance>> {
        self.historic_variable_instances(process_instance_id).await
    }
}

#[async_trait]
impl TaskEndpoint for EngineClient {
    async fn fetch_and_lock(&self, request: &FetchAndLockRequest) -> Result<Vec<LeasedTask>> {
        self.fetch_and_lock_tasks(request).await
    }

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> Result<()> {
        self.complete_task(task_id, request).await
    }

    async fn report_failure(&self, task_id: &str, request: &FailureRequest) -> Result<()> {
        self.fail_task(task_id, request).await
    }
}
