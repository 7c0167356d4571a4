use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{AppState, handlers};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/intents", post(handlers::create_intent_handler))
        .route("/intents", get(handlers::list_intents_handler))
        .route("/intents/{id}", put(handlers::update_intent_handler))
        .route("/intents/{id}", get(handlers::get_intent_handler))
        .route("/repos/{owner}/{name}", get(handlers::get_repository_handler))
        .route(
            "/repos/{owner}/{name}/committers",
            get(handlers::top_committers_handler),
        )
        .route(
            "/repos/{owner}/{name}/commits",
            get(handlers::get_commits_handler),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
