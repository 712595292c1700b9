use std::fmt::Display;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::model::{LastMessage, Message};
use crate::{conversation, user};

/// Identifies one websocket connection.
#[derive(Clone, Copy, Debug, Serialize, Hash, PartialEq, Eq)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Event pushed to the sessions joined to a conversation room.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    MessageReceived {
        message: Message,
    },
    Typing {
        conversation_id: conversation::Id,
        principal: user::Id,
    },
    StopTyping {
        conversation_id: conversation::Id,
        principal: user::Id,
    },
    MessagesRead {
        conversation_id: conversation::Id,
        reader_id: user::Id,
        count: usize,
    },
}

/// Command sent by a client over its websocket.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(
    tag = "type",
    rename_all = "snake_case",
    rename_all_fields = "camelCase",
    deny_unknown_fields
)]
pub enum Command {
    JoinRoom {
        conversation_id: conversation::Id,
    },
    LeaveRoom {
        conversation_id: conversation::Id,
    },
    SendMessage {
        conversation_id: conversation::Id,
        content: String,
    },
    Typing {
        conversation_id: conversation::Id,
    },
    StopTyping {
        conversation_id: conversation::Id,
    },
    MarkRead {
        conversation_id: conversation::Id,
    },
}

/// Payload published to the notification subject of a principal.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Notification {
    NewConversation {
        conversation_id: conversation::Id,
        initiator: user::Id,
    },
    NewMessage {
        conversation_id: conversation::Id,
        last_message: LastMessage,
    },
    MessagesRead {
        conversation_id: conversation::Id,
        reader_id: user::Id,
        count: usize,
    },
}
