mod common;

use common::{FakeHistory, MemorySink, activity, eventually, instance, ts};
use fluxnova_cdc::cdc::{
    CheckpointStore, FileCheckpointStore, Pipeline, PipelineState, Publisher, Streams,
};
use fluxnova_cdc::config::{Config, PipelineConfig};
use fluxnova_cdc::error::Error;
use fluxnova_cdc::model::Watermark;
use fluxnova_cdc::shutdown::Shutdown;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tempfile::TempDir;

const T0: &str = "2024-05-01T09:00:00.000+0000";
const T1: &str = "2024-05-01T09:05:00.000+0000";
const T2: &str = "2024-05-01T09:10:00.000+0000";

struct Harness {
    history: Arc<FakeHistory>,
    sink: Arc<MemorySink>,
    store: Arc<FileCheckpointStore>,
    config: PipelineConfig,
    _dir: TempDir,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default().pipeline;
        config.poll_interval = Duration::from_millis(20);
        config.checkpoint_path = dir.path().join("checkpoint.json");
        Self {
            history: Arc::new(FakeHistory::new()),
            sink: Arc::new(MemorySink::new()),
            store: Arc::new(FileCheckpointStore::new(config.checkpoint_path.clone())),
            config,
            _dir: dir,
        }
    }

    fn pipeline(&self, shutdown: Shutdown) -> Pipeline {
        let publisher =
            Publisher::new(self.sink.clone(), Streams::default()).with_backoff(Duration::ZERO);
        Pipeline::new(
            self.history.clone(),
            publisher,
            self.store.clone(),
            &self.config,
            shutdown,
        )
    }

    async fn stored(&self) -> Option<Watermark> {
        self.store.load(&self.config.checkpoint_name).await.unwrap()
    }
}

#[tokio::test]
async fn unreachable_engine_fails_startup() {
    let h = Harness::new();
    h.history.unreachable.store(true, Ordering::SeqCst);
    let mut pipeline = h.pipeline(Shutdown::new());

    let err = pipeline.run().await.unwrap_err();
    assert!(matches!(err, Error::Startup(_)));
    assert_eq!(pipeline.state(), PipelineState::Idle);
    assert_eq!(h.history.query_count(), 0);
}

#[tokio::test]
async fn early_shutdown_still_runs_one_cycle_and_drains() {
    let h = Harness::new();
    h.history.add_instance(instance("P1", T0, None));
    h.history.add_activity(activity("A1", "P1", T0));

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut pipeline = h.pipeline(shutdown);
    pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(h.history.query_count(), 1);
    assert_eq!(h.sink.keys_on("fluxnova-processes"), ["P1"]);
    assert_eq!(h.sink.keys_on("fluxnova-events"), ["A1"]);
    assert!(h.sink.closed.load(Ordering::SeqCst));
    assert_eq!(h.stored().await, Some(Watermark::at(ts(T0))));
}

#[tokio::test]
async fn polls_on_interval_until_shutdown() {
    let h = Harness::new();
    h.history.add_instance(instance("P1", T0, None));

    let shutdown = Shutdown::new();
    let mut pipeline = h.pipeline(shutdown.clone());
    let mut states = pipeline.subscribe();
    let handle = tokio::spawn(async move {
        pipeline.run().await.unwrap();
        pipeline
    });

    states.wait_for(|s| *s == PipelineState::Polling).await.unwrap();
    let sink = h.sink.clone();
    assert!(eventually(Duration::from_secs(2), || sink.keys_on("fluxnova-processes").len() == 1).await);

    // new history shows up on a later tick
    h.history.add_instance(instance("P2", T1, None));
    let sink = h.sink.clone();
    assert!(eventually(Duration::from_secs(2), || sink.keys_on("fluxnova-processes").len() == 2).await);

    shutdown.trigger();
    let pipeline = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert_eq!(pipeline.watermark(), Watermark::at(ts(T1)));
    assert_eq!(h.sink.keys_on("fluxnova-processes"), ["P1", "P2"]);
    assert!(h.history.query_count() >= 3);
}

#[tokio::test]
async fn restart_resumes_from_stored_checkpoint() {
    let h = Harness::new();
    h.history.add_instance(instance("P1", T0, None));
    h.history.add_instance(instance("P2", T1, None));

    let mut first = h.pipeline(Shutdown::new());
    first.connect().await.unwrap();
    first.poll_and_publish().await.unwrap();
    assert_eq!(h.stored().await, Some(Watermark::at(ts(T1))));

    h.history.add_instance(instance("P3", T2, None));
    let mut second = h.pipeline(Shutdown::new());
    second.connect().await.unwrap();
    assert_eq!(second.state(), PipelineState::Connected);
    assert_eq!(second.watermark(), Watermark::at(ts(T1)));

    let summary = second.poll_and_publish().await.unwrap();
    assert_eq!(summary.events, 1);
    assert_eq!(h.sink.keys_on("fluxnova-processes"), ["P1", "P2", "P3"]);
}

#[tokio::test]
async fn publish_failures_do_not_hold_back_the_checkpoint() {
    let h = Harness::new();
    h.history.add_instance(instance("P1", T0, None));
    h.sink.fail_all.store(true, Ordering::SeqCst);

    let mut pipeline = h.pipeline(Shutdown::new());
    pipeline.connect().await.unwrap();
    let summary = pipeline.poll_and_publish().await.unwrap();

    assert_eq!(summary.events, 1);
    assert_eq!(summary.failed_records, 1);
    assert_eq!(summary.watermark, Watermark::at(ts(T0)));
    assert_eq!(h.stored().await, Some(Watermark::at(ts(T0))));
}

#[tokio::test]
async fn engine_error_mid_run_keeps_watermark_and_recovers() {
    let h = Harness::new();
    h.history.add_instance(instance("P1", T0, None));

    let mut pipeline = h.pipeline(Shutdown::new());
    pipeline.connect().await.unwrap();
    pipeline.poll_and_publish().await.unwrap();

    h.history.add_instance(instance("P2", T1, None));
    h.history.fail_instances.store(true, Ordering::SeqCst);
    let err = pipeline.poll_and_publish().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(pipeline.watermark(), Watermark::at(ts(T0)));
    assert_eq!(h.stored().await, Some(Watermark::at(ts(T0))));

    h.history.fail_instances.store(false, Ordering::SeqCst);
    let summary = pipeline.poll_and_publish().await.unwrap();
    assert_eq!(summary.events, 1);
    assert_eq!(h.stored().await, Some(Watermark::at(ts(T1))));
}

#[tokio::test]
async fn idle_cycle_does_not_write_a_checkpoint() {
    let h = Harness::new();
    let mut pipeline = h.pipeline(Shutdown::new());
    pipeline.connect().await.unwrap();

    let summary = pipeline.poll_and_publish().await.unwrap();
    assert_eq!(summary.events, 0);
    assert!(summary.watermark.is_empty());
    assert_eq!(h.stored().await, None);
    assert!(!h.config.checkpoint_path.exists());
}

#[tokio::test]
async fn close_failure_still_reaches_stopped() {
    let h = Harness::new();
    h.sink.fail_close.store(true, Ordering::SeqCst);

    let shutdown = Shutdown::new();
    shutdown.trigger();
    let mut pipeline = h.pipeline(shutdown);
    pipeline.run().await.unwrap();

    assert_eq!(pipeline.state(), PipelineState::Stopped);
    assert!(h.sink.closed.load(Ordering::SeqCst));
}
