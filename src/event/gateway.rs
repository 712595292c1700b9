use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};

use crate::{conversation, user};

use super::model::{Event, SessionId};

/// Events buffered per session before new ones are dropped for it.
pub const SESSION_BUFFER: usize = 256;

#[async_trait]
pub trait EventBus {
    /// Delivers `event` to every session joined to `room` except `exclude`.
    /// Best effort: a session whose channel is gone or full is skipped.
    async fn publish(&self, room: &conversation::Id, event: Event, exclude: Option<&SessionId>);
}

struct Session {
    principal: user::Id,
    sender: mpsc::Sender<Event>,
    rooms: HashSet<conversation::Id>,
}

#[derive(Default)]
struct Registry {
    sessions: HashMap<SessionId, Session>,
    rooms: HashMap<conversation::Id, HashSet<SessionId>>,
}

/// Ephemeral session and room membership of live websocket connections.
#[derive(Clone, Default)]
pub struct Gateway {
    registry: Arc<RwLock<Registry>>,
}

impl Gateway {
    pub async fn connect(&self, principal: user::Id) -> (SessionId, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(SESSION_BUFFER);
        let id = SessionId::random();

        self.registry.write().await.sessions.insert(
            id,
            Session {
                principal,
                sender,
                rooms: HashSet::new(),
            },
        );

        debug!("session {id} connected for {principal}");
        (id, receiver)
    }

    pub async fn join(&self, session: &SessionId, room: &conversation::Id) {
        let mut registry = self.registry.write().await;

        match registry.sessions.get_mut(session) {
            Some(s) => {
                s.rooms.insert(*room);
            }
            None => {
                warn!("unknown session {session} tried to join {room}");
                return;
            }
        }

        registry.rooms.entry(*room).or_default().insert(*session);
    }

    pub async fn leave(&self, session: &SessionId, room: &conversation::Id) {
        let mut registry = self.registry.write().await;

        if let Some(s) = registry.sessions.get_mut(session) {
            s.rooms.remove(room);
        }

        if let Some(members) = registry.rooms.get_mut(room) {
            members.remove(session);
            if members.is_empty() {
                registry.rooms.remove(room);
            }
        }
    }

    pub async fn disconnect(&self, session: &SessionId) {
        let mut registry = self.registry.write().await;

        let Some(s) = registry.sessions.remove(session) else {
            return;
        };

        for room in s.rooms {
            if let Some(members) = registry.rooms.get_mut(&room) {
                members.remove(session);
                if members.is_empty() {
                    registry.rooms.remove(&room);
                }
            }
        }

        debug!("session {session} of {} disconnected", s.principal);
    }

    pub async fn members(&self, room: &conversation::Id) -> usize {
        self.registry
            .read()
            .await
            .rooms
            .get(room)
            .map_or(0, HashSet::len)
    }
}

#[async_trait]
impl EventBus for Gateway {
    async fn publish(&self, room: &conversation::Id, event: Event, exclude: Option<&SessionId>) {
        let registry = self.registry.read().await;

        let Some(members) = registry.rooms.get(room) else {
            return;
        };

        members
            .iter()
            .filter(|id| Some(*id) != exclude)
            .filter_map(|id| registry.sessions.get(id).map(|s| (id, s)))
            .for_each(|(id, s)| match s.sender.try_send(event.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("session {id} of {} is lagging, event dropped", s.principal)
                }
                Err(TrySendError::Closed(_)) => debug!("session {id} is gone, event dropped"),
            });
    }
}
