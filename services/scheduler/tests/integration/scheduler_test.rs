use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde_json::json;
use tokio::sync::watch;

use chime_domain::recurrence::{Recurrence, Recurring};
use chime_scheduler::domain::types::{CallbackResponse, EventFilter};
use chime_scheduler::error::{CallbackError, SchedulerServiceError};
use chime_scheduler::usecase::outcome::Outcome;
use chime_scheduler::usecase::scheduler::EventInput;

use crate::helpers::{Harness, hash_of, options, test_event};

fn input(body: serde_json::Value) -> EventInput {
    serde_json::from_value(body).unwrap()
}

fn every_ten_minutes() -> Recurring {
    Recurring::Every(Recurrence {
        minutes: 10,
        ..Default::default()
    })
}

fn done(event: chime_scheduler::domain::types::Event) -> Outcome {
    Outcome::Done {
        event,
        response: CallbackResponse {
            status: 200,
            body: String::new(),
        },
    }
}

#[tokio::test]
async fn should_queue_overdue_event_on_add() {
    let h = Harness::new(options(60));
    let past = Utc::now().timestamp_millis() - 5_000;

    let event = h
        .scheduler
        .add(
            "digest",
            "user-1",
            &input(json!({"run_at": past, "request": {"href": "http://localhost/hook"}})),
        )
        .await
        .unwrap();

    assert_eq!(event.run_at.timestamp_millis(), past);
    assert_eq!(event.request.method, "POST");
    let score = h.queue.score(&hash_of("digest", "user-1")).unwrap();
    assert!(score > past);
}

#[tokio::test]
async fn should_reject_invalid_add_before_touching_store() {
    let h = Harness::new(options(60));

    let missing_run_at = h
        .scheduler
        .add("digest", "k", &input(json!({"request": {"href": "http://localhost/hook"}})))
        .await;
    assert!(matches!(missing_run_at, Err(SchedulerServiceError::MissingRunAt)));

    let missing_request = h
        .scheduler
        .add("digest", "k", &input(json!({"run_in": 10})))
        .await;
    assert!(matches!(missing_request, Err(SchedulerServiceError::MissingRequest)));

    let reserved = h
        .scheduler
        .add(
            "list",
            "k",
            &input(json!({"run_in": 10, "request": {"href": "http://localhost/hook"}})),
        )
        .await;
    assert!(matches!(reserved, Err(SchedulerServiceError::InvalidSlug(_))));

    assert_eq!(h.repo.len(), 0);
}

#[tokio::test]
async fn should_leave_far_events_out_until_resync_brings_them_in() {
    let h = Harness::new(options(1));

    h.scheduler
        .add(
            "digest",
            "later",
            &input(json!({"run_in": 1.5, "request": {"href": "http://localhost/hook"}})),
        )
        .await
        .unwrap();
    assert_eq!(h.queue.score(&hash_of("digest", "later")), None);

    assert_eq!(h.scheduler.resync_once().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(h.scheduler.resync_once().await.unwrap(), 1);
    assert!(h.queue.score(&hash_of("digest", "later")).is_some());
}

#[tokio::test]
async fn should_drop_stale_entries_on_resync() {
    let h = Harness::new(options(60));
    let stale = test_event("digest", "stale", Utc::now(), Recurring::Never);
    h.scheduler.dispatcher.queue(&[stale]).await.unwrap();
    h.repo.insert(test_event("digest", "live", Utc::now(), Recurring::Never));

    h.scheduler.resync_once().await.unwrap();

    assert_eq!(h.queue.score(&hash_of("digest", "stale")), None);
    assert!(h.queue.score(&hash_of("digest", "live")).is_some());
}

#[tokio::test]
async fn should_delete_from_store_and_dispatch() {
    let h = Harness::new(options(60));
    h.scheduler
        .add(
            "digest",
            "user-1",
            &input(json!({"run_in": 0, "request": {"href": "http://localhost/hook"}})),
        )
        .await
        .unwrap();
    assert_eq!(h.queue.ordered_len(), 1);

    assert!(h.scheduler.del("digest", "user-1").await.unwrap());

    assert_eq!(h.queue.ordered_len(), 0);
    assert!(h.scheduler.get("digest", "user-1").await.unwrap().is_none());
    assert!(!h.scheduler.del("digest", "user-1").await.unwrap());
}

#[tokio::test]
async fn should_merge_request_fields_on_update() {
    let h = Harness::new(options(60));
    h.scheduler
        .add(
            "digest",
            "user-1",
            &input(json!({
                "run_in": 30,
                "request": {"href": "http://localhost/hook", "headers": {"x-a": "1"}, "body": {"n": 1}}
            })),
        )
        .await
        .unwrap();

    let updated = h
        .scheduler
        .update(
            "digest",
            "user-1",
            &input(json!({"request": {"method": "PUT", "headers": {"x-b": "2"}}})),
        )
        .await
        .unwrap();

    assert_eq!(updated.request.href, "http://localhost/hook");
    assert_eq!(updated.request.method, "PUT");
    assert_eq!(updated.request.headers.len(), 2);
    assert_eq!(updated.request.body, json!({"n": 1}));
}

#[tokio::test]
async fn should_reject_update_of_missing_event_unless_upserting() {
    let body = input(json!({"run_in": 5, "request": {"href": "http://localhost/hook"}}));

    let strict = Harness::new(options(60));
    assert!(matches!(
        strict.scheduler.update("digest", "user-1", &body).await,
        Err(SchedulerServiceError::EventNotFound)
    ));

    let mut upsert_options = options(60);
    upsert_options.upsert = true;
    let lenient = Harness::new(upsert_options);
    let created = lenient.scheduler.update("digest", "user-1", &body).await.unwrap();
    assert_eq!(created.key, "user-1");
    assert!(lenient.queue.score(&hash_of("digest", "user-1")).is_some());
}

#[tokio::test]
async fn should_reject_empty_update() {
    let h = Harness::new(options(60));
    h.repo.insert(test_event("digest", "user-1", Utc::now(), Recurring::Never));

    let result = h.scheduler.update("digest", "user-1", &EventInput::default()).await;

    assert!(matches!(result, Err(SchedulerServiceError::MissingUpdates)));
}

#[tokio::test]
async fn should_rearm_failed_event_when_rescheduled() {
    let h = Harness::new(options(60));
    let mut failed = test_event("digest", "user-1", Utc::now(), Recurring::Never);
    failed.failed = true;
    failed.failed_code = Some(500);
    failed.failed_response = Some("boom".into());
    h.repo.insert(failed);

    let updated = h
        .scheduler
        .update("digest", "user-1", &input(json!({"run_in": 1})))
        .await
        .unwrap();

    assert!(!updated.failed);
    assert_eq!(updated.failed_code, None);
    assert_eq!(updated.failed_response, None);
    assert!(h.queue.score(&hash_of("digest", "user-1")).is_some());
}

#[tokio::test]
async fn should_advance_recurring_event_after_done() {
    let h = Harness::new(options(3600));
    let run_at = Utc::now() - TimeDelta::seconds(1);
    let event = test_event("digest", "user-1", run_at, every_ten_minutes());
    h.repo.insert(event.clone());

    h.scheduler.handle_outcome(done(event)).await;

    let stored = h.repo.stored("digest", "user-1").expect("recurring event kept");
    assert_eq!(stored.run_at, run_at + TimeDelta::minutes(10));
    assert_eq!(
        h.queue.score(&hash_of("digest", "user-1")),
        Some(stored.run_at.timestamp_millis())
    );
}

#[tokio::test]
async fn should_not_queue_next_occurrence_beyond_horizon() {
    let h = Harness::new(options(60));
    let event = test_event("digest", "user-1", Utc::now(), every_ten_minutes());
    h.repo.insert(event.clone());

    h.scheduler.handle_outcome(done(event)).await;

    assert!(h.repo.stored("digest", "user-1").is_some());
    assert_eq!(h.queue.ordered_len(), 0);
}

#[tokio::test]
async fn should_destroy_one_shot_event_after_done() {
    let h = Harness::new(options(60));
    let event = test_event("digest", "user-1", Utc::now(), Recurring::Never);
    h.repo.insert(event.clone());

    h.scheduler.handle_outcome(done(event)).await;

    assert!(h.repo.stored("digest", "user-1").is_none());
}

#[tokio::test]
async fn should_keep_schedule_changed_while_in_flight() {
    let h = Harness::new(options(60));
    let executed = test_event("digest", "user-1", Utc::now(), Recurring::Never);
    let mut moved = executed.clone();
    moved.run_at = executed.run_at + TimeDelta::hours(1);
    h.repo.insert(moved.clone());

    h.scheduler.handle_outcome(done(executed)).await;

    assert_eq!(h.repo.stored("digest", "user-1"), Some(moved));
}

#[tokio::test]
async fn should_retain_or_destroy_failed_events_per_options() {
    let failure = |event| Outcome::Failed {
        event,
        attempt: 3,
        error: CallbackError::Status {
            code: 500,
            body: String::new(),
        },
    };

    let retain = Harness::new(options(60));
    let event = test_event("digest", "user-1", Utc::now(), Recurring::Never);
    retain.repo.insert(event.clone());
    retain.scheduler.handle_outcome(failure(event.clone())).await;
    assert!(retain.repo.stored("digest", "user-1").is_some());

    let mut discard_options = options(60);
    discard_options.retain_failed = false;
    let discard = Harness::new(discard_options);
    discard.repo.insert(event.clone());
    discard.scheduler.handle_outcome(failure(event)).await;
    assert!(discard.repo.stored("digest", "user-1").is_none());
}

#[tokio::test]
async fn should_list_failed_events_separately() {
    let h = Harness::new(options(60));
    h.repo.insert(test_event("digest", "ok", Utc::now(), Recurring::Never));
    let mut failed = test_event("digest", "bad", Utc::now(), Recurring::Never);
    failed.failed = true;
    h.repo.insert(failed);

    let pending = h.scheduler.list(&EventFilter::default()).await.unwrap();
    let failed = h
        .scheduler
        .list(&EventFilter {
            failed: true,
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, "ok");
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].key, "bad");
}

/// Runs the dispatcher, one worker and the outcome loop until `done` holds.
async fn run_until(mut h: Harness, mut done: impl FnMut(&Harness) -> bool) -> Harness {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let outcomes = h.take_outcomes();
    let scheduler = h.scheduler.clone();

    let tasks = vec![
        tokio::spawn(scheduler.dispatcher.clone().run(shutdown_rx.clone())),
        tokio::spawn(h.worker(3).run(shutdown_rx.clone())),
        tokio::spawn(scheduler.run_outcomes(outcomes, shutdown_rx)),
    ];
    for _ in 0..300 {
        if done(&h) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown_tx.send(true).unwrap();
    for task in tasks {
        task.await.unwrap();
    }
    h
}

#[tokio::test]
async fn should_execute_one_shot_digest_once_then_forget_it() {
    let h = Harness::new(options(60));
    let run_at = Utc::now().timestamp_millis() + 500;
    h.scheduler
        .add(
            "digest",
            "user-1",
            &input(json!({
                "run_at": run_at,
                "recurring": false,
                "request": {"href": "http://localhost/digest", "body": {"user": 1}}
            })),
        )
        .await
        .unwrap();

    let h = run_until(h, |h| h.repo.stored("digest", "user-1").is_none()).await;

    assert!(Utc::now().timestamp_millis() >= run_at);
    assert_eq!(h.client.call_count(), 1);
    assert_eq!(h.client.calls.lock().unwrap()[0].href, "http://localhost/digest");
    assert!(h.scheduler.get("digest", "user-1").await.unwrap().is_none());
}

#[tokio::test]
async fn should_keep_recurring_event_after_execution() {
    let h = Harness::new(options(60));
    let event = h
        .scheduler
        .add(
            "digest",
            "weekly",
            &input(json!({
                "run_in": 0,
                "recurring": {"minutes": 10},
                "request": {"href": "http://localhost/digest"}
            })),
        )
        .await
        .unwrap();
    let first_run = event.run_at;

    let h = run_until(h, |h| {
        h.repo
            .stored("digest", "weekly")
            .is_some_and(|stored| stored.run_at != first_run)
    })
    .await;

    let stored = h.scheduler.get("digest", "weekly").await.unwrap().unwrap();
    assert_eq!(stored.run_at, first_run + TimeDelta::minutes(10));
    assert_eq!(h.client.call_count(), 1);
}
