//! In-memory stand-ins for the engine and the broker.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fluxnova_cdc::client::external_task::{CompleteRequest, FailureRequest, FetchAndLockRequest};
use fluxnova_cdc::client::history::{
    HistoricActivityInstance, HistoricProcessInstance, HistoricVariableInstance,
};
use fluxnova_cdc::client::{HistorySource, TaskEndpoint};
use fluxnova_cdc::error::{Error, Result};
use fluxnova_cdc::model::{LeasedTask, TypedValue, parse_engine_time};
use fluxnova_cdc::sink::{Record, RecordSink};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn ts(s: &str) -> DateTime<Utc> {
    parse_engine_time(s).unwrap()
}

pub fn instance(id: &str, start: &str, end: Option<&str>) -> HistoricProcessInstance {
    HistoricProcessInstance {
        id: id.to_string(),
        process_definition_key: "customer-service-ticket".to_string(),
        process_definition_id: "customer-service-ticket:1:abc".to_string(),
        business_key: Some(format!("TKT-{id}")),
        start_time: start.to_string(),
        end_time: end.map(str::to_string),
        duration_in_millis: match end {
            Some(end) => Some((ts(end) - ts(start)).num_milliseconds()),
            None => None,
        },
        state: if end.is_some() { "COMPLETED" } else { "ACTIVE" }.to_string(),
        ..Default::default()
    }
}

pub fn activity(id: &str, process_instance_id: &str, start: &str) -> HistoricActivityInstance {
    HistoricActivityInstance {
        id: id.to_string(),
        process_instance_id: process_instance_id.to_string(),
        activity_id: format!("act-{id}"),
        activity_name: Some(format!("Activity {id}")),
        activity_type: "serviceTask".to_string(),
        execution_id: format!("exec-{process_instance_id}"),
        start_time: start.to_string(),
        ..Default::default()
    }
}

pub fn variable(name: &str, type_name: &str, value: serde_json::Value) -> HistoricVariableInstance {
    HistoricVariableInstance {
        id: format!("var-{name}"),
        name: name.to_string(),
        type_name: Some(type_name.to_string()),
        value,
        ..Default::default()
    }
}

/// Engine history held in memory.
///
/// `startedAfter` is exclusive unless `inclusive_lower_bound` is set, in
/// which case an instance starting exactly at the bound is returned again.
#[derive(Default)]
pub struct FakeHistory {
    pub unreachable: AtomicBool,
    pub fail_instances: AtomicBool,
    pub inclusive_lower_bound: AtomicBool,
    instances: Mutex<Vec<HistoricProcessInstance>>,
    activities: Mutex<HashMap<String, Vec<HistoricActivityInstance>>>,
    variables: Mutex<HashMap<String, Vec<HistoricVariableInstance>>>,
    failing_activities: Mutex<HashSet<String>>,
    failing_variables: Mutex<HashSet<String>>,
    pub queries: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_instance(&self, instance: HistoricProcessInstance) {
        self.instances.lock().unwrap().push(instance);
    }

    pub fn add_activity(&self, activity: HistoricActivityInstance) {
        self.activities
            .lock()
            .unwrap()
            .entry(activity.process_instance_id.clone())
            .or_default()
            .push(activity);
    }

    pub fn add_variable(&self, process_instance_id: &str, variable: HistoricVariableInstance) {
        self.variables
            .lock()
            .unwrap()
            .entry(process_instance_id.to_string())
            .or_default()
            .push(variable);
    }

    pub fn fail_activities_for(&self, process_instance_id: &str) {
        self.failing_activities
            .lock()
            .unwrap()
            .insert(process_instance_id.to_string());
    }

    pub fn fail_variables_for(&self, process_instance_id: &str) {
        self.failing_variables
            .lock()
            .unwrap()
            .insert(process_instance_id.to_string());
    }

    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }
}

#[async_trait]
impl HistorySource for FakeHistory {
    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(Error::transport("connection refused"));
        }
        Ok(())
    }

    async fn process_instances(
        &self,
        started_after: Option<DateTime<Utc>>,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<HistoricProcessInstance>> {
        self.queries.lock().unwrap().push(started_after);
        if self.fail_instances.load(Ordering::SeqCst) {
            return Err(Error::Transport {
                message: "engine API error 503".to_string(),
                status: Some(503),
            });
        }
        let inclusive = self.inclusive_lower_bound.load(Ordering::SeqCst);
        let mut matching: Vec<_> = self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|i| match (started_after, parse_engine_time(&i.start_time)) {
                (None, _) => true,
                // unparsable start times are returned as-is, like a real engine would
                (Some(_), Err(_)) => true,
                (Some(bound), Ok(start)) if inclusive => start >= bound,
                (Some(bound), Ok(start)) => start > bound,
            })
            .cloned()
            .collect();
        matching.sort_by_key(|i| parse_engine_time(&i.start_time).ok());
        Ok(matching
            .into_iter()
            .skip(first_result)
            .take(max_results)
            .collect())
    }

    async fn activity_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricActivityInstance>> {
        if self.failing_activities.lock().unwrap().contains(process_instance_id) {
            return Err(Error::transport("activity history unavailable"));
        }
        Ok(self
            .activities
            .lock()
            .unwrap()
            .get(process_instance_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn variable_instances(
        &self,
        process_instance_id: &str,
    ) -> Result<Vec<HistoricVariableInstance>> {
        if self.failing_variables.lock().unwrap().contains(process_instance_id) {
            return Err(Error::Decode("malformed variable history".to_string()));
        }
        Ok(self
            .variables
            .lock()
            .unwrap()
            .get(process_instance_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Broker stand-in. Failures can be injected per partition key.
#[derive(Default)]
pub struct MemorySink {
    records: Mutex<Vec<(String, Record)>>,
    /// key → remaining number of sends to fail (`usize::MAX` = always)
    failures: Mutex<HashMap<String, usize>>,
    pub fail_all: AtomicBool,
    pub fail_close: AtomicBool,
    pub closed: AtomicBool,
    pub attempts: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_key(&self, key: &str, times: usize) {
        self.failures.lock().unwrap().insert(key.to_string(), times);
    }

    pub fn records(&self) -> Vec<(String, Record)> {
        self.records.lock().unwrap().clone()
    }

    pub fn on_stream(&self, stream: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, r)| r)
            .collect()
    }

    /// Keys delivered to `stream`, sorted. Records are sent concurrently so
    /// arrival order is not meaningful.
    pub fn keys_on(&self, stream: &str) -> Vec<String> {
        let mut keys: Vec<_> = self.on_stream(stream).into_iter().map(|r| r.key).collect();
        keys.sort();
        keys
    }

    pub fn record(&self, stream: &str, key: &str) -> Record {
        self.on_stream(stream)
            .into_iter()
            .find(|r| r.key == key)
            .unwrap_or_else(|| panic!("no record {key} on {stream}"))
    }
}

#[async_trait]
impl RecordSink for MemorySink {
    async fn send(&self, stream: &str, record: &Record) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let fail = self.fail_all.load(Ordering::SeqCst) || {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&record.key) {
                Some(n) if *n > 0 => {
                    if *n != usize::MAX {
                        *n -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(Error::Publish {
                stream: stream.to_string(),
                key: record.key.clone(),
                message: "broker unavailable".to_string(),
            });
        }
        self.records
            .lock()
            .unwrap()
            .push((stream.to_string(), record.clone()));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(Error::Other("flush timed out".to_string()));
        }
        Ok(())
    }
}

pub fn leased_task(id: &str, topic: &str, variables: Vec<(&str, TypedValue)>) -> LeasedTask {
    LeasedTask {
        id: id.to_string(),
        worker_id: "test-worker".to_string(),
        topic_name: topic.to_string(),
        process_instance_id: format!("proc-{id}"),
        process_definition_id: Some("customer-service-ticket:1:abc".to_string()),
        activity_id: format!("act-{topic}"),
        activity_instance_id: format!("actinst-{id}"),
        execution_id: format!("exec-{id}"),
        business_key: None,
        retries: None,
        variables: variables
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        invalid_variables: BTreeMap::new(),
    }
}

/// External-task endpoint stand-in. Each fetch pops the next queued batch.
#[derive(Default)]
pub struct FakeTaskEndpoint {
    batches: Mutex<VecDeque<Result<Vec<LeasedTask>>>>,
    pub fetches: AtomicUsize,
    pub requests: Mutex<Vec<FetchAndLockRequest>>,
    pub completed: Mutex<Vec<(String, CompleteRequest)>>,
    pub failed: Mutex<Vec<(String, FailureRequest)>>,
    pub fail_completions: AtomicBool,
}

impl FakeTaskEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_batch(&self, tasks: Vec<LeasedTask>) {
        self.batches.lock().unwrap().push_back(Ok(tasks));
    }

    pub fn push_error(&self, error: Error) {
        self.batches.lock().unwrap().push_back(Err(error));
    }

    pub fn completed_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .completed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn failed_ids(&self) -> Vec<String> {
        let mut ids: Vec<_> = self
            .failed
            .lock()
            .unwrap()
            .iter()
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn resolved(&self) -> usize {
        self.completed.lock().unwrap().len() + self.failed.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskEndpoint for FakeTaskEndpoint {
    async fn fetch_and_lock(&self, request: &FetchAndLockRequest) -> Result<Vec<LeasedTask>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        self.batches
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn complete(&self, task_id: &str, request: &CompleteRequest) -> Result<()> {
        if self.fail_completions.load(Ordering::SeqCst) {
            return Err(Error::Transport {
                message: "engine API error 404".to_string(),
                status: Some(404),
            });
        }
        self.completed
            .lock()
            .unwrap()
            .push((task_id.to_string(), request.clone()));
        Ok(())
    }

    async fn report_failure(&self, task_id: &str, request: &FailureRequest) -> Result<()> {
        self.failed
            .lock()
            .unwrap()
            .push((task_id.to_string(), request.clone()));
        Ok(())
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
