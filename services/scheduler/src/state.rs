use crate::domain::repository::{DispatchQueue, EventRepository};
use crate::infra::db::DbEventRepository;
use crate::infra::queue::RedisDispatchQueue;
use crate::usecase::scheduler::Scheduler;

/// Shared application state passed to every handler via axum `State`.
#[derive(Clone)]
pub struct AppState<R = DbEventRepository, Q = RedisDispatchQueue>
where
    R: EventRepository,
    Q: DispatchQueue,
{
    pub scheduler: Scheduler<R, Q>,
}
