use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use chime_core::health::healthz;
use chime_core::middleware::{propagate_request_id_layer, request_id_layer};

use crate::domain::repository::{DispatchQueue, EventRepository};
use crate::handlers::events::{
    add_event, delete_event, get_event, list_events, readyz, update_event,
};
use crate::state::AppState;

pub fn build_router<R, Q>(state: AppState<R, Q>) -> Router
where
    R: EventRepository,
    Q: DispatchQueue,
{
    let event_routes = || {
        post(add_event::<R, Q>)
            .put(update_event::<R, Q>)
            .delete(delete_event::<R, Q>)
            .get(get_event::<R, Q>)
    };

    Router::new()
        // Health
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz::<R, Q>))
        // Events
        .route("/list", get(list_events::<R, Q>))
        .route("/{slug}", event_routes())
        .route("/{slug}/{key}", event_routes())
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id_layer())
        .layer(request_id_layer())
        .with_state(state)
}
