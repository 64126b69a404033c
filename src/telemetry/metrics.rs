//! Metric instrument factories.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fluxnova-cdc"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("fluxnova-cdc")
}

/// Counter: poll cycles.
/// Labels: `result` ("ok" | "idle" | "error").
pub fn poll_cycles() -> Counter<u64> {
    meter()
        .u64_counter("cdc.poll.cycles")
        .with_description("Number of history poll cycles")
        .build()
}

/// Counter: process events emitted by the poller.
pub fn poll_events() -> Counter<u64> {
    meter()
        .u64_counter("cdc.poll.events")
        .with_description("Number of process events emitted by the poller")
        .build()
}

/// Counter: watermark advances (cycles that moved the checkpoint forward).
pub fn watermark_advances() -> Counter<u64> {
    meter()
        .u64_counter("cdc.watermark.advances")
        .with_description("Number of times the poll watermark advanced")
        .build()
}

/// Counter: failed per-instance sub-queries and dropped instances.
/// Labels: `kind` ("activities" | "variables" | "instance").
pub fn subquery_failures() -> Counter<u64> {
    meter()
        .u64_counter("cdc.subquery.failures")
        .with_description("History sub-queries that failed and were skipped")
        .build()
}

/// Counter: records handed to the broker.
/// Labels: `stream`, `result` ("ok" | "error").
pub fn records_published() -> Counter<u64> {
    meter()
        .u64_counter("cdc.records.published")
        .with_description("Records written to broker streams")
        .build()
}

/// Counter: tasks received from fetch-and-lock.
pub fn tasks_fetched() -> Counter<u64> {
    meter()
        .u64_counter("tasks.fetched")
        .with_description("External tasks leased by this worker")
        .build()
}

/// Counter: resolved tasks.
/// Labels: `topic`, `outcome` ("completed" | "failed" | "report_error").
pub fn tasks_resolved() -> Counter<u64> {
    meter()
        .u64_counter("tasks.resolved")
        .with_description("External tasks resolved by this worker")
        .build()
}

/// Counter: tasks whose topic has no registered handler.
/// Labels: `topic`.
pub fn tasks_unroutable() -> Counter<u64> {
    meter()
        .u64_counter("tasks.unroutable")
        .with_description("External tasks with no matching handler")
        .build()
}

/// Counter: dispatch ticks skipped because the previous batch was still running.
pub fn dispatch_ticks_skipped() -> Counter<u64> {
    meter()
        .u64_counter("dispatch.ticks.skipped")
        .with_description("Dispatch ticks skipped by the re-entry guard")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("fluxnova.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
