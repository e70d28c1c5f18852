use std::time::{Duration, Instant};

use chime_scheduler::domain::repository::DispatchQueue;
use chime_scheduler::domain::types::DispatchEntry;
use chime_scheduler::infra::queue::{RedisDispatchQueue, redis_pool};

use crate::redis_stub::RedisStub;

const ORDERED_SET: &str = "chime-test-set";
const READY_QUEUE: &str = "chime-test-queue";

fn queue_with_timeout(url: &str, response_timeout: Duration) -> RedisDispatchQueue {
    let pool = redis_pool(url, 4, response_timeout).unwrap();
    RedisDispatchQueue::new(pool, ORDERED_SET, READY_QUEUE)
}

fn queue(stub: &RedisStub) -> RedisDispatchQueue {
    queue_with_timeout(&stub.url, Duration::from_secs(5))
}

fn entry(hash: &str, score: i64) -> DispatchEntry {
    DispatchEntry {
        hash: hash.to_owned(),
        score,
    }
}

#[tokio::test]
async fn should_return_none_after_blocking_on_empty_ready_list() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);

    let started = Instant::now();
    let popped = queue.pop_ready(Duration::from_secs(1)).await.unwrap();

    assert!(popped.is_none());
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn should_time_out_client_side_when_reply_wait_is_shorter_than_pop() {
    let stub = RedisStub::start().await;
    let queue = queue_with_timeout(&stub.url, Duration::from_millis(200));

    let err = queue.pop_ready(Duration::from_secs(1)).await.unwrap_err();

    assert!(err.is_unavailable());
}

#[tokio::test]
async fn should_pop_ready_hash_in_fifo_order() {
    let stub = RedisStub::start().await;
    stub.push(READY_QUEUE, "digest::a");
    stub.push(READY_QUEUE, "digest::b");
    let queue = queue(&stub);

    let first = queue.pop_ready(Duration::from_secs(1)).await.unwrap();
    let second = queue.pop_ready(Duration::from_secs(1)).await.unwrap();

    assert_eq!(first.as_deref(), Some("digest::a"));
    assert_eq!(second.as_deref(), Some("digest::b"));
    assert!(stub.list(READY_QUEUE).is_empty());
}

#[tokio::test]
async fn should_promote_due_entry_exactly_once() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);
    queue
        .schedule(&[entry("digest::due", 1_000), entry("digest::later", 9_000)])
        .await
        .unwrap();

    let first = queue.promote_due(5_000).await.unwrap();
    let second = queue.promote_due(5_000).await.unwrap();

    assert_eq!(first.as_deref(), Some("digest::due"));
    assert!(second.is_none());
    assert_eq!(stub.list(READY_QUEUE), ["digest::due"]);
    assert_eq!(stub.score(ORDERED_SET, "digest::due"), None);
    assert_eq!(stub.score(ORDERED_SET, "digest::later"), Some(9_000));
    assert_eq!(stub.script_loads(), 1);
}

#[tokio::test]
async fn should_promote_lowest_score_first() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);
    queue
        .schedule(&[entry("digest::b", 2_000), entry("digest::a", 1_000)])
        .await
        .unwrap();

    assert_eq!(queue.promote_due(5_000).await.unwrap().as_deref(), Some("digest::a"));
    assert_eq!(queue.promote_due(5_000).await.unwrap().as_deref(), Some("digest::b"));
    assert_eq!(stub.list(READY_QUEUE), ["digest::a", "digest::b"]);
}

#[tokio::test]
async fn should_replace_score_when_rescheduling() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);

    queue.schedule(&[entry("digest::a", 1_000)]).await.unwrap();
    queue.schedule(&[entry("digest::a", 7_000)]).await.unwrap();

    assert_eq!(stub.score(ORDERED_SET, "digest::a"), Some(7_000));
    assert_eq!(stub.sorted_len(ORDERED_SET), 1);
    assert!(queue.promote_due(5_000).await.unwrap().is_none());
}

#[tokio::test]
async fn should_unschedule_and_clear_ordered_set() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);
    queue
        .schedule(&[entry("digest::a", 1_000), entry("digest::b", 2_000), entry("digest::c", 3_000)])
        .await
        .unwrap();

    queue.unschedule(&["digest::a".to_owned()]).await.unwrap();
    assert_eq!(stub.sorted_len(ORDERED_SET), 2);
    assert_eq!(stub.score(ORDERED_SET, "digest::a"), None);

    queue.clear().await.unwrap();
    assert_eq!(stub.sorted_len(ORDERED_SET), 0);
}

#[tokio::test]
async fn should_ping_through_recycled_connections() {
    let stub = RedisStub::start().await;
    let queue = queue(&stub);

    queue.ping().await.unwrap();
    queue.ping().await.unwrap();
}

#[tokio::test]
async fn should_report_unavailable_when_nothing_listens() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let queue = queue_with_timeout(&format!("redis://{addr}"), Duration::from_secs(1));

    let err = queue.ping().await.unwrap_err();

    assert!(err.is_unavailable());
}
