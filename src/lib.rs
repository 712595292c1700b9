use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::integration::Env;
use crate::state::AppState;

pub mod conversation;
pub mod delivery;
mod error;
pub mod event;
pub mod integration;
mod schema;
pub mod state;
pub mod user;

pub use error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every route but `/health` requires a resolved principal.
pub fn app(state: AppState) -> Router {
    let protected = Router::new()
        .nest("/api", conversation::api(state.clone()))
        .merge(event::endpoints(state))
        .route_layer(axum::middleware::from_fn(
            user::middleware::resolve_principal,
        ));

    Router::new()
        .merge(protected)
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

pub fn cors(env: &Env) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(env.allow_origin())
        .allow_methods(env.allow_methods())
        .allow_headers(env.allow_headers())
}

async fn health() -> StatusCode {
    StatusCode::OK
}
