//! Reference backend: the REST contract for interests and channels plus the
//! STOMP push endpoint at `/rtm`.

pub mod push;
pub mod routes;
pub mod stomp_session;

use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use kindred_db::Database;

pub use push::PushHub;

pub struct AppStateInner {
    pub db: Database,
    pub hub: PushHub,
}

pub type AppState = Arc<AppStateInner>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/interest", get(routes::get_interest).post(routes::save_interest))
        .route("/interests/incoming", get(routes::list_incoming))
        .route("/interests/sent", get(routes::list_sent))
        .route("/channel", get(routes::get_channel).post(routes::save_channel))
        .route("/channels", get(routes::list_channels))
        .route("/rtm", get(routes::rtm_upgrade))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
