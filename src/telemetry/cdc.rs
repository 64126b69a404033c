//! Change-capture span helpers.

use tracing::Span;

use crate::model::Watermark;

/// Start a span for one poll-and-publish cycle.
///
/// `cdc.events` and `cdc.watermark.to` are filled by [`record_cycle`].
pub fn start_poll_span(cycle: u64, from: &Watermark) -> Span {
    tracing::info_span!(
        "cdc.poll",
        "cdc.cycle" = cycle,
        "cdc.watermark.from" = %from,
        "cdc.events" = tracing::field::Empty,
        "cdc.watermark.to" = tracing::field::Empty,
    )
}

pub fn record_cycle(span: &Span, events: usize, to: &Watermark) {
    span.record("cdc.events", events as u64);
    span.record("cdc.watermark.to", tracing::field::display(to));
}
