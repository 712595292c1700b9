use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use gateway::EventBus;

use crate::state::AppState;

pub mod gateway;
mod handler;
pub mod model;
pub mod notifier;

pub type Bus = Arc<dyn EventBus + Send + Sync>;
pub type Notifier = Arc<dyn notifier::Notifier + Send + Sync>;

pub fn endpoints<S>(state: AppState) -> Router<S> {
    Router::new()
        .route("/ws", get(handler::ws))
        .with_state(state)
}
