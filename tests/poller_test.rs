mod common;

use common::{FakeHistory, activity, instance, ts, variable};
use fluxnova_cdc::cdc::Poller;
use fluxnova_cdc::model::{ProcessState, TypedValue, Watermark};
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::Ordering;

const T0: &str = "2024-05-01T09:00:00.000+0000";
const T1: &str = "2024-05-01T09:05:00.000+0000";
const T2: &str = "2024-05-01T09:10:00.000+0000";

fn two_instance_engine() -> Arc<FakeHistory> {
    let history = Arc::new(FakeHistory::new());
    history.add_instance(instance("P1", T0, None));
    history.add_instance(instance("P2", T1, Some("2024-05-01T09:06:30.000+0000")));
    history
}

#[tokio::test]
async fn first_poll_emits_in_start_order_then_goes_idle() {
    let history = two_instance_engine();
    let mut poller = Poller::new(history.clone(), 100);
    assert!(poller.checkpoint().is_empty());

    let events = poller.poll().await.unwrap();
    let ids: Vec<_> = events.iter().map(|e| e.process_instance_id.as_str()).collect();
    assert_eq!(ids, ["P1", "P2"]);
    assert_eq!(events[0].state(), ProcessState::Active);
    assert!(events[0].end_time().is_none());
    assert_eq!(events[1].state(), ProcessState::Completed);
    assert_eq!(events[1].duration_ms(), Some(90_000));
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));

    let events = poller.poll().await.unwrap();
    assert!(events.is_empty());
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));

    // the second query was bounded by the first cycle's watermark
    assert_eq!(history.queries.lock().unwrap()[1], Some(ts(T1)));
}

#[tokio::test]
async fn idle_engine_leaves_empty_watermark_untouched() {
    let history = Arc::new(FakeHistory::new());
    let mut poller = Poller::new(history, 10);

    assert!(poller.poll().await.unwrap().is_empty());
    assert_eq!(poller.checkpoint(), Watermark::empty());
}

#[tokio::test]
async fn activity_failure_still_emits_the_process() {
    let history = two_instance_engine();
    history.add_activity(activity("A1", "P1", "2024-05-01T09:00:00.100+0000"));
    history.add_activity(activity("A2", "P2", "2024-05-01T09:05:00.100+0000"));
    history.add_variable("P1", variable("customerId", "String", json!("CUST-001")));
    history.fail_activities_for("P1");

    let mut poller = Poller::new(history, 100);
    let events = poller.poll().await.unwrap();

    assert_eq!(events.len(), 2);
    assert!(events[0].activities.is_empty());
    assert_eq!(
        events[0].variables.get("customerId"),
        Some(&TypedValue::String("CUST-001".into()))
    );
    assert_eq!(events[1].activities.len(), 1);
    assert_eq!(events[1].activities[0].activity_instance_id, "A2");
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));
}

#[tokio::test]
async fn variable_failure_yields_empty_variables() {
    let history = two_instance_engine();
    history.add_variable("P2", variable("priority", "Integer", json!(3)));
    history.fail_variables_for("P2");

    let mut poller = Poller::new(history, 100);
    let events = poller.poll().await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(events[1].variables.is_empty());
}

#[tokio::test]
async fn malformed_variables_are_dropped_individually() {
    let history = two_instance_engine();
    history.add_variable("P1", variable("attempts", "Integer", json!("three")));
    history.add_variable("P1", variable("vip", "Boolean", json!(true)));

    let mut poller = Poller::new(history, 100);
    let events = poller.poll().await.unwrap();
    let vars = &events[0].variables;
    assert!(!vars.contains_key("attempts"));
    assert_eq!(vars.get("vip"), Some(&TypedValue::Boolean(true)));
}

#[tokio::test]
async fn instance_query_failure_is_an_error_and_keeps_watermark() {
    let history = two_instance_engine();
    let mut poller = Poller::new(history.clone(), 100);
    poller.poll().await.unwrap();
    let before = poller.checkpoint();

    history.add_instance(instance("P3", T2, None));
    history.fail_instances.store(true, Ordering::SeqCst);
    let err = poller.poll().await.unwrap_err();
    assert!(err.is_transport());
    assert_eq!(poller.checkpoint(), before);

    // the next tick picks up where it left off
    history.fail_instances.store(false, Ordering::SeqCst);
    let events = poller.poll().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].process_instance_id, "P3");
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T2)));
}

#[tokio::test]
async fn watermark_is_monotonic_and_strictly_advances_on_new_data() {
    let history = Arc::new(FakeHistory::new());
    let mut poller = Poller::new(history.clone(), 100);
    let mut last = poller.checkpoint();

    for (i, start) in [T0, T1, T2].iter().enumerate() {
        history.add_instance(instance(&format!("P{i}"), start, None));
        poller.poll().await.unwrap();
        assert!(poller.checkpoint() > last);
        last = poller.checkpoint();

        poller.poll().await.unwrap();
        assert_eq!(poller.checkpoint(), last);
    }
}

fn ids(events: &[fluxnova_cdc::model::ProcessEvent]) -> Vec<&str> {
    events.iter().map(|e| e.process_instance_id.as_str()).collect()
}

#[tokio::test]
async fn inclusive_bound_does_not_repeat_the_boundary_instance() {
    let history = two_instance_engine();
    history.inclusive_lower_bound.store(true, Ordering::SeqCst);
    let mut poller = Poller::new(history.clone(), 100);

    assert_eq!(ids(&poller.poll().await.unwrap()), ["P1", "P2"]);
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));

    for _ in 0..5 {
        assert!(poller.poll().await.unwrap().is_empty());
        assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));
    }

    // a new instance tied with the watermark is still captured, once
    history.add_instance(instance("P3", T1, None));
    assert_eq!(ids(&poller.poll().await.unwrap()), ["P3"]);
    assert!(poller.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn full_page_of_boundary_ties_is_paged_past() {
    let history = Arc::new(FakeHistory::new());
    history.inclusive_lower_bound.store(true, Ordering::SeqCst);
    history.add_instance(instance("Q1", T0, None));
    history.add_instance(instance("Q2", T0, None));
    history.add_instance(instance("Q3", T0, None));
    history.add_instance(instance("Q4", "2024-05-01T10:00:00.000+0000", None));

    let mut poller = Poller::new(history, 2);
    assert_eq!(ids(&poller.poll().await.unwrap()), ["Q1", "Q2"]);
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T0)));

    assert_eq!(ids(&poller.poll().await.unwrap()), ["Q3", "Q4"]);
    assert_eq!(
        poller.checkpoint(),
        Watermark::at(ts("2024-05-01T10:00:00.000+0000"))
    );

    assert!(poller.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn restored_boundary_is_redelivered_once() {
    let history = two_instance_engine();
    history.inclusive_lower_bound.store(true, Ordering::SeqCst);
    let mut poller = Poller::new(history, 100);
    poller.set_checkpoint(Watermark::at(ts(T1)));

    // tie memory is not persisted, so P2 comes back after a restore
    assert_eq!(ids(&poller.poll().await.unwrap()), ["P2"]);
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));
    assert!(poller.poll().await.unwrap().is_empty());
}

#[tokio::test]
async fn batch_size_caps_each_cycle() {
    let history = Arc::new(FakeHistory::new());
    history.add_instance(instance("P1", T0, None));
    history.add_instance(instance("P2", T1, None));
    history.add_instance(instance("P3", T2, None));

    let mut poller = Poller::new(history, 2);
    let first = poller.poll().await.unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));

    let second = poller.poll().await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].process_instance_id, "P3");
}

#[tokio::test]
async fn restored_checkpoint_skips_captured_history() {
    let history = two_instance_engine();
    let mut poller = Poller::new(history, 100);
    poller.set_checkpoint(Watermark::at(ts(T0)));

    let events = poller.poll().await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].process_instance_id, "P2");
}

#[tokio::test]
async fn poll_from_does_not_touch_held_watermark() {
    let history = two_instance_engine();
    let poller = Poller::new(history, 100);

    let batch = poller.poll_from(Watermark::at(ts(T0))).await.unwrap();
    assert_eq!(batch.events.len(), 1);
    assert_eq!(batch.watermark, Watermark::at(ts(T1)));
    assert!(poller.checkpoint().is_empty());

    let idle = poller.poll_from(Watermark::at(ts(T2))).await.unwrap();
    assert!(idle.events.is_empty());
    assert_eq!(idle.watermark, Watermark::at(ts(T2)));
}

#[tokio::test]
async fn unparsable_instance_is_skipped() {
    let history = two_instance_engine();
    history.add_instance(instance("BROKEN", "yesterday", None));

    let mut poller = Poller::new(history, 100);
    let events = poller.poll().await.unwrap();
    let ids: Vec<_> = events.iter().map(|e| e.process_instance_id.as_str()).collect();
    assert_eq!(ids, ["P1", "P2"]);
    assert_eq!(poller.checkpoint(), Watermark::at(ts(T1)));
}
