//! Typed process variables.
//!
//! The engine transmits variables as `{"value": .., "type": "..", "valueInfo": {..}}`.
//! [`TypedValue`] is the decoded form; shape mismatches (an `Integer` whose
//! value is a string, a `Json` variable holding invalid JSON) are rejected
//! at decode time.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Variable name → typed value. Ordered for deterministic serialization.
pub type Variables = BTreeMap<String, TypedValue>;

#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    Null,
    Boolean(bool),
    Short(i16),
    Integer(i32),
    Long(i64),
    Double(f64),
    String(String),
    Date(DateTime<FixedOffset>),
    /// Structured JSON. Transmitted as a serialized string with type `Json`.
    Json(Value),
    /// Types this crate does not interpret (Object, Bytes, Xml, ...).
    Opaque { type_name: String, value: Value },
}

/// Wire representation of a single engine variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireVariable {
    #[serde(default)]
    pub value: Value,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_info: Option<Value>,
}

impl TypedValue {
    /// Engine type name for this value.
    pub fn type_name(&self) -> &str {
        match self {
            TypedValue::Null => "Null",
            TypedValue::Boolean(_) => "Boolean",
            TypedValue::Short(_) => "Short",
            TypedValue::Integer(_) => "Integer",
            TypedValue::Long(_) => "Long",
            TypedValue::Double(_) => "Double",
            TypedValue::String(_) => "String",
            TypedValue::Date(_) => "Date",
            TypedValue::Json(_) => "Json",
            TypedValue::Opaque { type_name, .. } => type_name,
        }
    }

    /// Decode a `(type, value)` pair as reported by the engine.
    ///
    /// A missing type is inferred from the JSON value.
    pub fn decode(type_name: Option<&str>, value: Value) -> Result<Self> {
        let Some(type_name) = type_name else {
            return Ok(Self::infer(value));
        };
        if value.is_null() {
            return Ok(TypedValue::Null);
        }
        let mismatch = |v: &Value| Error::Decode(format!("{type_name} variable has value {v}"));
        match type_name.to_ascii_lowercase().as_str() {
            "null" => Ok(TypedValue::Null),
            "boolean" => value.as_bool().map(TypedValue::Boolean).ok_or_else(|| mismatch(&value)),
            "short" => value
                .as_i64()
                .and_then(|n| i16::try_from(n).ok())
                .map(TypedValue::Short)
                .ok_or_else(|| mismatch(&value)),
            "integer" => value
                .as_i64()
                .and_then(|n| i32::try_from(n).ok())
                .map(TypedValue::Integer)
                .ok_or_else(|| mismatch(&value)),
            "long" => value.as_i64().map(TypedValue::Long).ok_or_else(|| mismatch(&value)),
            "double" => value.as_f64().map(TypedValue::Double).ok_or_else(|| mismatch(&value)),
            "string" => value
                .as_str()
                .map(|s| TypedValue::String(s.to_string()))
                .ok_or_else(|| mismatch(&value)),
            "date" => {
                let s = value.as_str().ok_or_else(|| mismatch(&value))?;
                DateTime::parse_from_str(s, super::ENGINE_TIME_FORMAT)
                    .or_else(|_| DateTime::parse_from_rfc3339(s))
                    .map(TypedValue::Date)
                    .map_err(|_| mismatch(&value))
            }
            "json" => match value {
                Value::String(s) => serde_json::from_str(&s)
                    .map(TypedValue::Json)
                    .map_err(|e| Error::Decode(format!("Json variable is not valid JSON: {e}"))),
                other => Ok(TypedValue::Json(other)),
            },
            _ => Ok(TypedValue::Opaque {
                type_name: type_name.to_string(),
                value,
            }),
        }
    }

    fn infer(value: Value) -> Self {
        match value {
            Value::Null => TypedValue::Null,
            Value::Bool(b) => TypedValue::Boolean(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => TypedValue::Long(i),
                None => TypedValue::Double(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => TypedValue::String(s),
            other => TypedValue::Json(other),
        }
    }

    pub fn from_wire(wire: WireVariable) -> Result<Self> {
        Self::decode(wire.type_name.as_deref(), wire.value)
    }

    pub fn to_wire(&self) -> WireVariable {
        let value = match self {
            TypedValue::Json(v) => Value::String(v.to_string()),
            TypedValue::Date(d) => Value::String(d.format(super::ENGINE_TIME_FORMAT).to_string()),
            TypedValue::Opaque { value, .. } => value.clone(),
            other => other.to_json(),
        };
        WireVariable {
            value,
            type_name: Some(self.type_name().to_string()),
            value_info: None,
        }
    }

    /// Plain JSON rendering, as embedded in published records.
    pub fn to_json(&self) -> Value {
        match self {
            TypedValue::Null => Value::Null,
            TypedValue::Boolean(b) => Value::Bool(*b),
            TypedValue::Short(n) => Value::from(*n),
            TypedValue::Integer(n) => Value::from(*n),
            TypedValue::Long(n) => Value::from(*n),
            TypedValue::Double(n) => Value::from(*n),
            TypedValue::String(s) => Value::String(s.clone()),
            TypedValue::Date(d) => Value::String(d.to_rfc3339()),
            TypedValue::Json(v) => v.clone(),
            TypedValue::Opaque { value, .. } => value.clone(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TypedValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TypedValue::Short(n) => Some(f64::from(*n)),
            TypedValue::Integer(n) => Some(f64::from(*n)),
            TypedValue::Long(n) => Some(*n as f64),
            TypedValue::Double(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TypedValue::Null)
    }
}

/// Decode a wire variable map, failing on the first malformed entry.
pub fn decode_variables(wire: BTreeMap<String, WireVariable>) -> Result<Variables> {
    wire.into_iter()
        .map(|(name, v)| {
            TypedValue::from_wire(v)
                .map(|tv| (name.clone(), tv))
                .map_err(|e| Error::Decode(format!("variable {name}: {e}")))
        })
        .collect()
}

pub fn encode_variables(vars: &Variables) -> BTreeMap<String, WireVariable> {
    vars.iter().map(|(k, v)| (k.clone(), v.to_wire())).collect()
}

/// Flatten variables into a JSON object of plain values.
pub fn variables_to_json(vars: &Variables) -> Value {
    Value::Object(vars.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}
