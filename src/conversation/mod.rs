use std::fmt::Display;
use std::sync::Arc;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use directory::ConversationDirectory;
use receipt::ReadReceiptTracker;
use repository::ConversationRepository;
use service::ConversationService;

use crate::{state::AppState, user};

pub mod directory;
mod handler;
pub mod memory;
pub mod model;
pub mod receipt;
pub mod repository;
pub mod service;

pub type Result<T> = std::result::Result<T, Error>;
pub type Repository = Arc<dyn ConversationRepository + Send + Sync>;
pub type Service = Arc<dyn ConversationService + Send + Sync>;
pub type Directory = Arc<dyn ConversationDirectory + Send + Sync>;
pub type Receipts = Arc<dyn ReadReceiptTracker + Send + Sync>;

pub fn api<S>(s: AppState) -> Router<S> {
    Router::new()
        .route(
            "/conversations",
            get(handler::api::find_all).post(handler::api::create),
        )
        .route("/conversations/messages", post(handler::api::send_message))
        .route("/conversations/{id}", get(handler::api::open))
        .route("/conversations/{id}/read", put(handler::api::mark_read))
        .with_state(s)
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Hash, PartialEq, Eq)]
#[serde(transparent)]
pub struct Id(Uuid);

impl Id {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn get(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for Id {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, Hash, PartialEq, Eq)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("conversation not found: {0}")]
    NotFound(Id),
    #[error("principal is not a participant of conversation {0}")]
    NotParticipant(Id),
    #[error("message content is empty")]
    EmptyContent,
    #[error("cannot start a conversation with oneself")]
    SelfConversation,

    #[error(transparent)]
    _User(#[from] user::Error),
    #[error(transparent)]
    _R2d2(#[from] r2d2::Error),
    #[error(transparent)]
    _Diesel(#[from] diesel::result::Error),
    #[error(transparent)]
    _Join(#[from] tokio::task::JoinError),
}

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::NotParticipant(_) => StatusCode::FORBIDDEN,
            Error::EmptyContent | Error::SelfConversation => StatusCode::BAD_REQUEST,
            Error::_User(e) => StatusCode::from(e),
            Error::_R2d2(_) | Error::_Diesel(_) | Error::_Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}
