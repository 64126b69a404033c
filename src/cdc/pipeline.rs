//! Pipeline orchestrator: owns the poll/publish cadence and lifecycle.
//!
//! `Idle → Connected → Polling → Draining → Stopped`. Startup fails if the
//! engine is unreachable. Shutdown is observed between cycles only, so a
//! cycle that has started always publishes and checkpoints before the loop
//! exits.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, error, info, warn};

use super::checkpoint::CheckpointStore;
use super::poller::Poller;
use super::publisher::Publisher;
use crate::client::HistorySource;
use crate::config::PipelineConfig;
use crate::error::{Error, Result};
use crate::model::Watermark;
use crate::shutdown::Shutdown;
use crate::telemetry::cdc::{record_cycle, start_poll_span};
use crate::telemetry::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Connected,
    Polling,
    Draining,
    Stopped,
}

/// Summary of one poll-and-publish cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub events: usize,
    pub failed_records: usize,
    pub watermark: Watermark,
}

pub struct Pipeline {
    source: Arc<dyn HistorySource>,
    poller: Poller,
    publisher: Publisher,
    checkpoints: Arc<dyn CheckpointStore>,
    checkpoint_name: String,
    /// Last watermark known to be stored.
    persisted: Watermark,
    interval: Duration,
    shutdown: Shutdown,
    state: watch::Sender<PipelineState>,
    cycles: u64,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn HistorySource>,
        publisher: Publisher,
        checkpoints: Arc<dyn CheckpointStore>,
        config: &PipelineConfig,
        shutdown: Shutdown,
    ) -> Self {
        let (state, _) = watch::channel(PipelineState::Idle);
        Self {
            poller: Poller::new(Arc::clone(&source), config.batch_size),
            source,
            publisher,
            checkpoints,
            checkpoint_name: config.checkpoint_name.clone(),
            persisted: Watermark::empty(),
            interval: config.poll_interval,
            shutdown,
            state,
            cycles: 0,
        }
    }

    /// Observe lifecycle transitions.
    pub fn subscribe(&self) -> watch::Receiver<PipelineState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        *self.state.borrow()
    }

    pub fn watermark(&self) -> Watermark {
        self.poller.checkpoint()
    }

    fn transition(&self, to: PipelineState) {
        let from = self.state.send_replace(to);
        info!(?from, ?to, "pipeline state");
    }

    /// Connect, restore the checkpoint, and poll until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.connect().await?;

        self.transition(PipelineState::Polling);
        self.cycle().await;

        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            self.cycle().await;
        }

        self.transition(PipelineState::Draining);
        if let Err(e) = self.publisher.close().await {
            warn!(error = %e, "publisher did not close cleanly; buffered records may be lost");
        }
        self.transition(PipelineState::Stopped);
        Ok(())
    }

    /// `Idle → Connected`: verify the engine and load the persisted watermark.
    pub async fn connect(&mut self) -> Result<()> {
        self.source
            .ping()
            .await
            .map_err(|e| Error::Startup(format!("workflow engine unreachable: {e}")))?;

        let restored = self
            .checkpoints
            .load(&self.checkpoint_name)
            .await
            .map_err(|e| Error::Startup(format!("cannot load checkpoint: {e}")))?
            .unwrap_or_default();
        self.poller.set_checkpoint(restored);
        self.persisted = restored;
        info!(checkpoint = %self.checkpoint_name, watermark = %restored, "restored watermark");

        self.transition(PipelineState::Connected);
        Ok(())
    }

    /// Run one cycle, logging failures. Errors never stop the loop.
    async fn cycle(&mut self) {
        self.cycles += 1;
        let from = self.poller.checkpoint();
        let span = start_poll_span(self.cycles, &from);
        let started = Instant::now();

        let result = self.poll_and_publish().instrument(span.clone()).await;

        let outcome = match &result {
            Ok(summary) => {
                record_cycle(&span, summary.events, &summary.watermark);
                if summary.events == 0 { "idle" } else { "ok" }
            }
            Err(e) => {
                error!(parent: &span, error = %e, "poll cycle failed, retrying next tick");
                "error"
            }
        };
        metrics::poll_cycles().add(1, &[KeyValue::new("result", outcome)]);
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("operation", "poll_cycle")],
        );
    }

    /// Poll once, publish the batch, then persist the advanced watermark.
    pub async fn poll_and_publish(&mut self) -> Result<CycleSummary> {
        let from = self.poller.checkpoint();
        let events = self.poller.poll().await?;
        let to = self.poller.checkpoint();

        let report = self.publisher.publish(&events).await;
        for failure in &report.failures {
            error!(error = %failure, "record not published");
        }

        metrics::poll_events().add(events.len() as u64, &[]);
        if to > from {
            metrics::watermark_advances().add(1, &[]);
        }
        if to > self.persisted {
            match self.checkpoints.save(&self.checkpoint_name, &to).await {
                Ok(()) => self.persisted = to,
                Err(e) => {
                    warn!(error = %e, watermark = %to, "checkpoint save failed; will retry next cycle")
                }
            }
        }

        Ok(CycleSummary {
            events: events.len(),
            failed_records: report.failures.len(),
            watermark: to,
        })
    }
}
