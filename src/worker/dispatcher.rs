//! Task dispatch loop.
//!
//! On each tick the dispatcher leases a batch of external tasks and hands
//! them over a channel to a fixed pool of worker tasks. Each task is resolved
//! on its own: a failing handler never affects the completion report of
//! another task in the same batch.
//!
//! A tick that fires while the previous batch is still being handled is
//! skipped, not queued. The batch guard is held by every task of the batch
//! and released when the last one is resolved. Handlers run on their own
//! tokio task, so a panic resolves that task as failed and the worker slot
//! survives.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedMutexGuard, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use super::registry::HandlerRegistry;
use crate::client::TaskEndpoint;
use crate::client::external_task::{
    CompleteRequest, FailureRequest, FetchAndLockRequest, TopicSubscription,
};
use crate::config::WorkerConfig;
use crate::error::Result;
use crate::model::LeasedTask;
use crate::shutdown::Shutdown;
use crate::sink::{Record, RecordSink};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_outcome, start_task_span};

/// How a leased task ended on this worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Completed,
    /// The handler returned an error; failure reported with zero retries.
    Failed,
    /// Variables did not match the topic schema.
    InvalidInput,
    /// No handler is registered for the topic.
    Unroutable,
    /// The handler succeeded but the completion report did not reach the
    /// engine. The lease will lapse and the task may run again elsewhere.
    Unreported,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Completed => "completed",
            Resolution::Failed => "failed",
            Resolution::InvalidInput => "invalid_input",
            Resolution::Unroutable => "unroutable",
            Resolution::Unreported => "unreported",
        }
    }
}

/// Resolves single tasks: route, extract input, run the handler, report.
#[derive(Clone)]
pub struct TaskRunner {
    endpoint: Arc<dyn TaskEndpoint>,
    registry: Arc<HandlerRegistry>,
    decisions: Option<(Arc<dyn RecordSink>, String)>,
    worker_id: String,
}

impl TaskRunner {
    pub fn new(
        endpoint: Arc<dyn TaskEndpoint>,
        registry: Arc<HandlerRegistry>,
        worker_id: impl Into<String>,
    ) -> Self {
        Self {
            endpoint,
            registry,
            decisions: None,
            worker_id: worker_id.into(),
        }
    }

    /// Publish handler decision context to `stream` on this sink.
    #[must_use]
    pub fn with_decision_sink(mut self, sink: Arc<dyn RecordSink>, stream: impl Into<String>) -> Self {
        self.decisions = Some((sink, stream.into()));
        self
    }

    pub async fn run(&self, task: LeasedTask) -> Resolution {
        let span = start_task_span(&task.topic_name, &task.id, &task.process_instance_id);
        let resolution = self.resolve(&task).instrument(span.clone()).await;
        record_outcome(&span, resolution.as_str());
        metrics::tasks_resolved().add(
            1,
            &[
                KeyValue::new("topic", task.topic_name.clone()),
                KeyValue::new("outcome", resolution.as_str()),
            ],
        );
        resolution
    }

    async fn resolve(&self, task: &LeasedTask) -> Resolution {
        let Some((schema, handler)) = self.registry.get(&task.topic_name) else {
            warn!(topic = %task.topic_name, task_id = %task.id, "no handler registered for topic");
            metrics::tasks_unroutable()
                .add(1, &[KeyValue::new("topic", task.topic_name.clone())]);
            let message = format!("no handler registered for topic {}", task.topic_name);
            self.report_failure(&task.id, &message, None).await;
            return Resolution::Unroutable;
        };

        let input = match schema.extract(task) {
            Ok(input) => input,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "task input rejected");
                self.report_failure(&task.id, &e.to_string(), None).await;
                return Resolution::InvalidInput;
            }
        };

        let started = Instant::now();
        let result = handler.handle(task, input).await;
        metrics::operation_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[
                KeyValue::new("operation", "task_handler"),
                KeyValue::new("topic", task.topic_name.clone()),
            ],
        );

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "handler failed");
                let details = format!(
                    "topic={} activity={} process_instance={}: {e:?}",
                    task.topic_name, task.activity_id, task.process_instance_id
                );
                self.report_failure(&task.id, &e.to_string(), Some(details)).await;
                return Resolution::Failed;
            }
        };

        if let Some(decision) = &output.decision {
            self.publish_decision(task, decision).await;
        }

        let request = CompleteRequest::new(&self.worker_id, &output.variables);
        match self.endpoint.complete(&task.id, &request).await {
            Ok(()) => {
                info!(task_id = %task.id, variables = output.variables.len(), "task completed");
                Resolution::Completed
            }
            Err(e) => {
                error!(task_id = %task.id, error = %e, "completion report failed");
                Resolution::Unreported
            }
        }
    }

    /// Like [`run`](Self::run), but on a task of its own. A handler that
    /// panics is reported to the engine as a final failure and the caller
    /// keeps going.
    pub async fn run_isolated(self: &Arc<Self>, task: LeasedTask) -> Resolution {
        let task_id = task.id.clone();
        let topic = task.topic_name.clone();
        let runner = Arc::clone(self);
        let joined = tokio::spawn(async move { runner.run(task).await }).await;

        let e = match joined {
            Ok(resolution) => return resolution,
            Err(e) => e,
        };
        error!(task_id = %task_id, topic = %topic, error = %e, "task handler aborted");
        let message = if e.is_panic() {
            format!("handler for topic {topic} panicked")
        } else {
            format!("handler for topic {topic} was cancelled")
        };
        self.report_failure(&task_id, &message, Some(format!("topic={topic}")))
            .await;
        metrics::tasks_resolved().add(
            1,
            &[
                KeyValue::new("topic", topic),
                KeyValue::new("outcome", Resolution::Failed.as_str()),
            ],
        );
        Resolution::Failed
    }

    async fn report_failure(&self, task_id: &str, message: &str, details: Option<String>) {
        let request = FailureRequest::final_failure(&self.worker_id, message, details);
        if let Err(e) = self.endpoint.report_failure(task_id, &request).await {
            error!(task_id, error = %e, "failure report did not reach the engine");
        }
    }

    async fn publish_decision(&self, task: &LeasedTask, record: &Record) {
        let Some((sink, stream)) = &self.decisions else {
            debug!(task_id = %task.id, "no decision sink configured, dropping decision context");
            return;
        };
        if let Err(e) = sink.send(stream, record).await {
            warn!(task_id = %task.id, stream = %stream, error = %e, "decision context not published");
        }
    }
}

struct Job {
    task: LeasedTask,
    _batch: Arc<OwnedMutexGuard<()>>,
}

pub struct Dispatcher {
    runner: TaskRunner,
    request: FetchAndLockRequest,
    concurrency: usize,
    tick: Duration,
    shutdown: Shutdown,
    batch_guard: Arc<Mutex<()>>,
}

impl Dispatcher {
    /// Subscribes to `config.topics`, or to every registered topic when that
    /// list is empty.
    pub fn new(
        endpoint: Arc<dyn TaskEndpoint>,
        registry: Arc<HandlerRegistry>,
        config: &WorkerConfig,
        shutdown: Shutdown,
    ) -> Self {
        let topics = if config.topics.is_empty() {
            registry.subscriptions(config.lock_duration)
        } else {
            config
                .topics
                .iter()
                .map(|t| TopicSubscription::new(t.clone(), config.lock_duration))
                .collect()
        };
        for sub in topics.iter().filter(|s| !registry.contains(&s.topic_name)) {
            warn!(topic = %sub.topic_name, "subscribed topic has no handler; its tasks will be failed");
        }

        let request = FetchAndLockRequest {
            worker_id: config.worker_id.clone(),
            max_tasks: config.max_tasks,
            use_priority: config.use_priority,
            topics,
        };

        Self {
            runner: TaskRunner::new(endpoint, registry, config.worker_id.clone()),
            request,
            concurrency: config.concurrency.max(1),
            tick: config.tick,
            shutdown,
            batch_guard: Arc::new(Mutex::new(())),
        }
    }

    #[must_use]
    pub fn with_decision_sink(mut self, sink: Arc<dyn RecordSink>, stream: impl Into<String>) -> Self {
        self.runner = self.runner.with_decision_sink(sink, stream);
        self
    }

    pub fn fetch_request(&self) -> &FetchAndLockRequest {
        &self.request
    }

    /// Lease and handle tasks until shutdown. Tasks already leased when
    /// shutdown arrives are still resolved before this returns.
    pub async fn run(&self) -> Result<()> {
        let (tx, rx) = mpsc::channel::<Job>(self.request.max_tasks.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let runner = Arc::new(self.runner.clone());

        let workers: Vec<_> = (0..self.concurrency)
            .map(|slot| {
                let rx = Arc::clone(&rx);
                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    loop {
                        let job = rx.lock().await.recv().await;
                        let Some(Job { task, _batch: batch }) = job else { break };
                        runner.run_isolated(task).await;
                        drop(batch);
                    }
                    debug!(slot, "dispatch worker stopped");
                })
            })
            .collect();

        info!(
            worker_id = %self.request.worker_id,
            topics = ?self.request.topics.iter().map(|t| &t.topic_name).collect::<Vec<_>>(),
            concurrency = self.concurrency,
            "dispatch loop started"
        );

        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                _ = ticker.tick() => {}
            }
            self.dispatch(&tx).await;
        }

        drop(tx);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "dispatch worker panicked");
            }
        }
        info!("dispatch loop stopped");
        Ok(())
    }

    /// One tick: lease a batch unless the previous one is still running.
    async fn dispatch(&self, tx: &mpsc::Sender<Job>) -> usize {
        let guard = match Arc::clone(&self.batch_guard).try_lock_owned() {
            Ok(guard) => Arc::new(guard),
            Err(_) => {
                debug!("previous batch still running, skipping tick");
                metrics::dispatch_ticks_skipped().add(1, &[]);
                return 0;
            }
        };

        let tasks = match self.runner.endpoint.fetch_and_lock(&self.request).await {
            Ok(tasks) => tasks,
            Err(e) => {
                warn!(error = %e, "fetch-and-lock failed, retrying next tick");
                return 0;
            }
        };
        if tasks.is_empty() {
            return 0;
        }

        let count = tasks.len();
        metrics::tasks_fetched().add(count as u64, &[]);
        debug!(count, "leased tasks");

        for task in tasks {
            let job = Job {
                task,
                _batch: Arc::clone(&guard),
            };
            if tx.send(job).await.is_err() {
                warn!("dispatch workers are gone, abandoning leased tasks");
                break;
            }
        }
        count
    }
}
