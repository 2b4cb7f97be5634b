use std::sync::Arc;

use axum::routing::{get, post, put};
use axum::Router;

use crate::service::volume::{
    create_volume_handler, destroy_volume_handler, get_volume_handler, get_volume_stats_handler,
    list_volumes_handler, set_privileged_handler, set_property_handler, set_ttl_handler,
    stream_in_handler, stream_out_handler,
};
use crate::utils::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router<()> {
    Router::new()
        .route(
            "/volumes",
            post(create_volume_handler).get(list_volumes_handler),
        )
        .route(
            "/volumes/{handle}",
            get(get_volume_handler).delete(destroy_volume_handler),
        )
        .route("/volumes/{handle}/stats", get(get_volume_stats_handler))
        .route(
            "/volumes/{handle}/properties/{property}",
            put(set_property_handler),
        )
        .route("/volumes/{handle}/ttl", put(set_ttl_handler))
        .route("/volumes/{handle}/privileged", put(set_privileged_handler))
        .route("/volumes/{handle}/stream-in", put(stream_in_handler))
        .route("/volumes/{handle}/stream-out", get(stream_out_handler))
        .with_state(state)
}
