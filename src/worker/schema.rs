//! Topic input schemas.
//!
//! A topic declares which variables it reads and their shapes. Extraction
//! runs before the handler is called, so a task whose variables do not match
//! is failed at the boundary instead of deep inside business logic.

use serde::de::DeserializeOwned;

use crate::error::{Error, Result};
use crate::model::{LeasedTask, TypedValue, Variables};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableKind {
    String,
    Boolean,
    /// Any numeric engine type (Short, Integer, Long, Double).
    Number,
    /// A `Json` variable, or a `String` variable holding a JSON document.
    Json,
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSpec {
    pub name: String,
    pub kind: VariableKind,
    pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSchema {
    topic: String,
    variables: Vec<VariableSpec>,
}

impl TopicSchema {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            variables: Vec::new(),
        }
    }

    #[must_use]
    pub fn require(mut self, name: &str, kind: VariableKind) -> Self {
        self.variables.push(VariableSpec {
            name: name.to_string(),
            kind,
            required: true,
        });
        self
    }

    #[must_use]
    pub fn optional(mut self, name: &str, kind: VariableKind) -> Self {
        self.variables.push(VariableSpec {
            name: name.to_string(),
            kind,
            required: false,
        });
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn variables(&self) -> &[VariableSpec] {
        &self.variables
    }

    /// Check a leased task against this schema and collect the declared
    /// variables. Undeclared variables are not passed on.
    pub fn extract(&self, task: &LeasedTask) -> Result<TaskInput> {
        let mut values = Variables::new();

        for spec in &self.variables {
            if let Some(reason) = task.invalid_variables.get(&spec.name) {
                return Err(self.error(&spec.name, reason.clone()));
            }

            let value = match task.variables.get(&spec.name) {
                Some(v) if !v.is_null() => v,
                _ if spec.required => {
                    return Err(self.error(&spec.name, "required variable is missing".to_string()));
                }
                _ => continue,
            };

            let value = self.check(spec, value)?;
            values.insert(spec.name.clone(), value);
        }

        Ok(TaskInput {
            topic: self.topic.clone(),
            values,
        })
    }

    fn check(&self, spec: &VariableSpec, value: &TypedValue) -> Result<TypedValue> {
        let mismatch = || {
            self.error(
                &spec.name,
                format!("expected {:?}, got {}", spec.kind, value.type_name()),
            )
        };
        match (spec.kind, value) {
            (VariableKind::Any, v) => Ok(v.clone()),
            (VariableKind::String, TypedValue::String(_)) => Ok(value.clone()),
            (VariableKind::Boolean, TypedValue::Boolean(_)) => Ok(value.clone()),
            (VariableKind::Number, v) if v.as_f64().is_some() => Ok(v.clone()),
            (VariableKind::Json, TypedValue::Json(_)) => Ok(value.clone()),
            (VariableKind::Json, TypedValue::String(s)) => serde_json::from_str(s)
                .map(TypedValue::Json)
                .map_err(|e| self.error(&spec.name, format!("not a JSON document: {e}"))),
            _ => Err(mismatch()),
        }
    }

    fn error(&self, variable: &str, message: String) -> Error {
        Error::Schema {
            topic: self.topic.clone(),
            variable: variable.to_string(),
            message,
        }
    }
}

/// Validated handler input.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskInput {
    topic: String,
    values: Variables,
}

impl TaskInput {
    pub fn get(&self, name: &str) -> Option<&TypedValue> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(TypedValue::as_str)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(TypedValue::as_f64)
    }

    pub fn boolean(&self, name: &str) -> Option<bool> {
        match self.get(name) {
            Some(TypedValue::Boolean(b)) => Some(*b),
            _ => None,
        }
    }

    /// Deserialize a JSON variable into `T`. `Ok(None)` if it was not supplied.
    pub fn json<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.get(name) {
            Some(TypedValue::Json(v)) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(|e| Error::Schema {
                    topic: self.topic.clone(),
                    variable: name.to_string(),
                    message: e.to_string(),
                }),
            _ => Ok(None),
        }
    }
}
