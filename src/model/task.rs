//! Leased external tasks.

use serde::Deserialize;
use std::collections::BTreeMap;

use super::variable::{TypedValue, Variables, WireVariable};

/// A task claimed through fetch-and-lock.
///
/// The lease is held only for the lock duration requested at fetch time;
/// after that the engine may hand the same task to another worker.
#[derive(Debug, Clone, PartialEq)]
pub struct LeasedTask {
    pub id: String,
    pub worker_id: String,
    pub topic_name: String,
    pub process_instance_id: String,
    pub process_definition_id: Option<String>,
    pub activity_id: String,
    pub activity_instance_id: String,
    pub execution_id: String,
    pub business_key: Option<String>,
    pub retries: Option<i32>,
    pub variables: Variables,
    /// Variables the engine sent that did not match their declared type,
    /// keyed by name with the decode error. Rejected at input extraction.
    pub invalid_variables: BTreeMap<String, String>,
}

/// Task as returned by `POST /external-task/fetchAndLock`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalTaskDto {
    pub id: String,
    #[serde(default)]
    pub worker_id: String,
    pub topic_name: String,
    #[serde(default)]
    pub process_instance_id: String,
    pub process_definition_id: Option<String>,
    #[serde(default)]
    pub activity_id: String,
    #[serde(default)]
    pub activity_instance_id: String,
    #[serde(default)]
    pub execution_id: String,
    pub business_key: Option<String>,
    pub retries: Option<i32>,
    #[serde(default)]
    pub variables: Option<BTreeMap<String, WireVariable>>,
}

impl From<ExternalTaskDto> for LeasedTask {
    fn from(dto: ExternalTaskDto) -> Self {
        let mut variables = Variables::new();
        let mut invalid_variables = BTreeMap::new();
        for (name, wire) in dto.variables.unwrap_or_default() {
            match TypedValue::from_wire(wire) {
                Ok(v) => {
                    variables.insert(name, v);
                }
                Err(e) => {
                    invalid_variables.insert(name, e.to_string());
                }
            }
        }

        Self {
            id: dto.id,
            worker_id: dto.worker_id,
            topic_name: dto.topic_name,
            process_instance_id: dto.process_instance_id,
            process_definition_id: dto.process_definition_id,
            activity_id: dto.activity_id,
            activity_instance_id: dto.activity_instance_id,
            execution_id: dto.execution_id,
            business_key: dto.business_key,
            retries: dto.retries,
            variables,
            invalid_variables,
        }
    }
}
