use sea_orm::Database;
use tokio::sync::watch;
use tracing::info;

use chime_core::config::Config;
use chime_core::tracing::init_tracing;
use chime_scheduler::config::SchedulerConfig;
use chime_scheduler::infra::db::DbEventRepository;
use chime_scheduler::infra::http::ReqwestCallbackClient;
use chime_scheduler::infra::queue::{RedisDispatchQueue, redis_pool};
use chime_scheduler::router::build_router;
use chime_scheduler::state::AppState;
use chime_scheduler::usecase::dispatcher::Dispatcher;
use chime_scheduler::usecase::event::EventService;
use chime_scheduler::usecase::outcome::{OUTCOME_CHANNEL_CAPACITY, outcome_channel};
use chime_scheduler::usecase::scheduler::{Scheduler, SchedulerOptions};
use chime_scheduler::usecase::worker::{Worker, WorkerOptions};

#[tokio::main]
async fn main() {
    let config = SchedulerConfig::from_env();
    init_tracing(config.default_log_directive());

    let db = Database::connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    let redis = redis_pool(
        &config.redis_url,
        config.redis_pool_size(),
        config.redis_response_timeout(),
    )
    .expect("failed to create Redis pool");

    let queue = RedisDispatchQueue::new(
        redis,
        config.redis_ordered_set_name.clone(),
        config.redis_queue_name.clone(),
    );
    let client =
        ReqwestCallbackClient::new(config.request_timeout()).expect("failed to build callback client");
    let events = EventService::new(DbEventRepository { db }, config.hash_delimiter.clone());

    let (outcomes, outcome_rx) = outcome_channel(OUTCOME_CHANNEL_CAPACITY);
    let dispatcher = Dispatcher::new(
        queue.clone(),
        config.hash_delimiter.clone(),
        outcomes.clone(),
        config.poll_backoff(),
    );
    let scheduler = Scheduler {
        events: events.clone(),
        dispatcher: dispatcher.clone(),
        options: SchedulerOptions {
            horizon: config.horizon(),
            resync_backoff: config.resync_backoff(),
            zone: config.timezone,
            retain_failed: config.retain_failed,
            upsert: config.upsert,
        },
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::with_capacity(config.workers + 3);
    tasks.push(tokio::spawn(dispatcher.run(shutdown_rx.clone())));
    for n in 1..=config.workers {
        let worker = Worker {
            name: format!("worker-{n}"),
            events: events.clone(),
            queue: queue.clone(),
            client: client.clone(),
            outcomes: outcomes.clone(),
            options: WorkerOptions {
                retries: config.retry_count,
                retry_delay: config.retry_delay(),
                pop_timeout: config.ready_pop_timeout(),
                error_backoff: config.poll_backoff(),
            },
        };
        tasks.push(tokio::spawn(worker.run(shutdown_rx.clone())));
    }
    tasks.push(tokio::spawn(scheduler.clone().run_resync(shutdown_rx.clone())));
    tasks.push(tokio::spawn(
        scheduler.clone().run_outcomes(outcome_rx, shutdown_rx.clone()),
    ));
    drop(outcomes);

    let router = build_router(AppState { scheduler });
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind");

    info!(%addr, workers = config.workers, interval = config.interval, "scheduler listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .expect("server error");

    for task in tasks {
        let _ = task.await;
    }
    info!("scheduler stopped");
}
