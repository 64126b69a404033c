//! External task span helpers.

use tracing::Span;

/// Start a span for handling one leased task.
///
/// The `task.outcome` field is declared empty and filled by [`record_outcome`].
pub fn start_task_span(topic: &str, task_id: &str, process_instance_id: &str) -> Span {
    tracing::info_span!(
        "task.handle",
        "task.topic" = topic,
        "task.id" = task_id,
        "process.instance_id" = process_instance_id,
        "task.outcome" = tracing::field::Empty,
    )
}

/// Record how the task was resolved ("completed", "failed", ...).
pub fn record_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}
