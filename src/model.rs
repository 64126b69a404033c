//! Core data model.
//!
//! Process snapshots and activity records produced by the change poller,
//! the poll watermark, typed process variables, and leased external tasks.

pub mod process;
pub mod task;
pub mod variable;
pub mod watermark;

pub use process::{ActivityRecord, Lifecycle, ProcessEvent, ProcessState};
pub use task::LeasedTask;
pub use variable::{TypedValue, Variables};
pub use watermark::Watermark;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{Error, Result};

/// Timestamp format used by the engine's REST API, e.g.
/// `2024-05-01T09:30:00.000+0200`.
pub const ENGINE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Parse an engine timestamp. Accepts the engine's own format and RFC 3339.
pub fn parse_engine_time(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(s, ENGINE_TIME_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(s))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Decode(format!("bad engine timestamp {s:?}: {e}")))
}

/// Format a timestamp the way the engine expects it in query parameters.
pub fn format_engine_time(t: DateTime<Utc>) -> String {
    t.format(ENGINE_TIME_FORMAT).to_string()
}

/// RFC 3339 with millisecond precision, as written to `_valid_from`.
pub fn rfc3339(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
