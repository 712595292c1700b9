use std::cmp::Ordering;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::user;

use super::{Id, MessageId};

/// The two participants of a conversation, kept in ascending order so that
/// `{a, b}` and `{b, a}` compare and hash equal.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, Hash, PartialEq, Eq)]
#[serde(try_from = "[user::Id; 2]", into = "[user::Id; 2]")]
pub struct Participants([user::Id; 2]);

impl Participants {
    pub fn new(a: user::Id, b: user::Id) -> super::Result<Self> {
        match a.cmp(&b) {
            Ordering::Less => Ok(Self([a, b])),
            Ordering::Greater => Ok(Self([b, a])),
            Ordering::Equal => Err(super::Error::SelfConversation),
        }
    }

    pub const fn lo(&self) -> &user::Id {
        &self.0[0]
    }

    pub const fn hi(&self) -> &user::Id {
        &self.0[1]
    }

    pub fn contains(&self, principal: &user::Id) -> bool {
        self.0.contains(principal)
    }

    /// The participant that is not `principal`, if `principal` takes part at all.
    pub fn other(&self, principal: &user::Id) -> Option<&user::Id> {
        if self.lo() == principal {
            Some(self.hi())
        } else if self.hi() == principal {
            Some(self.lo())
        } else {
            None
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &user::Id> {
        self.0.iter()
    }
}

impl TryFrom<[user::Id; 2]> for Participants {
    type Error = super::Error;

    fn try_from([a, b]: [user::Id; 2]) -> super::Result<Self> {
        Self::new(a, b)
    }
}

impl From<Participants> for [user::Id; 2] {
    fn from(p: Participants) -> Self {
        p.0
    }
}

/// Validated content of a message about to be appended.
#[derive(Clone, Debug)]
pub struct NewMessage {
    content: String,
}

impl NewMessage {
    pub fn new(content: impl Into<String>) -> super::Result<Self> {
        let content = content.into();
        if content.trim().is_empty() {
            return Err(super::Error::EmptyContent);
        }

        Ok(Self { content })
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: MessageId,
    conversation_id: Id,
    seq: i64,
    sender_id: user::Id,
    content: String,
    timestamp: DateTime<Utc>,
    read: bool,
}

impl Message {
    pub(super) fn new(
        id: MessageId,
        conversation_id: Id,
        seq: i64,
        sender_id: user::Id,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
        read: bool,
    ) -> Self {
        Self {
            id,
            conversation_id,
            seq,
            sender_id,
            content: content.into(),
            timestamp,
            read,
        }
    }

    pub const fn id(&self) -> &MessageId {
        &self.id
    }

    pub const fn conversation_id(&self) -> &Id {
        &self.conversation_id
    }

    pub const fn seq(&self) -> i64 {
        self.seq
    }

    pub const fn sender_id(&self) -> &user::Id {
        &self.sender_id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub const fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }

    pub const fn read(&self) -> bool {
        self.read
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    content: String,
    sender_id: user::Id,
    timestamp: DateTime<Utc>,
}

impl LastMessage {
    pub(super) fn new(
        content: impl Into<String>,
        sender_id: user::Id,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            content: content.into(),
            sender_id,
            timestamp,
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub const fn sender_id(&self) -> &user::Id {
        &self.sender_id
    }

    pub const fn timestamp(&self) -> &DateTime<Utc> {
        &self.timestamp
    }
}

impl From<&Message> for LastMessage {
    fn from(m: &Message) -> Self {
        Self::new(m.content.clone(), m.sender_id, m.timestamp)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    id: Id,
    participants: Participants,
    messages: Vec<Message>,
    last_message: Option<LastMessage>,
    updated_at: DateTime<Utc>,
}

impl Conversation {
    pub(super) fn new(id: Id, participants: Participants, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            participants,
            messages: Vec::new(),
            last_message: None,
            updated_at: created_at,
        }
    }

    pub(super) fn from_parts(
        id: Id,
        participants: Participants,
        messages: Vec<Message>,
        last_message: Option<LastMessage>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            participants,
            messages,
            last_message,
            updated_at,
        }
    }

    pub const fn id(&self) -> &Id {
        &self.id
    }

    pub const fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub const fn last_message(&self) -> Option<&LastMessage> {
        self.last_message.as_ref()
    }

    pub const fn updated_at(&self) -> &DateTime<Utc> {
        &self.updated_at
    }

    /// Messages `principal` has not read yet, i.e. unread ones sent by the other side.
    pub fn unread_count(&self, principal: &user::Id) -> usize {
        self.messages
            .iter()
            .filter(|m| !m.read && m.sender_id != *principal)
            .count()
    }

    pub fn summary(&self, principal: &user::Id) -> Option<ConversationSummary> {
        let other = self.participants.other(principal)?;

        Some(ConversationSummary::new(
            self.id,
            *other,
            self.last_message.clone(),
            self.updated_at,
            self.unread_count(principal),
        ))
    }

    pub(super) fn append(
        &mut self,
        sender: &user::Id,
        msg: &NewMessage,
        now: DateTime<Utc>,
    ) -> super::Result<Message> {
        if !self.participants.contains(sender) {
            return Err(super::Error::NotParticipant(self.id));
        }

        let tail = self.messages.last().map(|m| (m.seq, m.timestamp));
        let (seq, timestamp) = next_position(tail, now);

        let message = Message::new(
            MessageId::random(),
            self.id,
            seq,
            *sender,
            msg.content(),
            timestamp,
            false,
        );

        self.messages.push(message.clone());
        self.last_message = Some(LastMessage::from(&message));
        self.updated_at = self.updated_at.max(timestamp);

        Ok(message)
    }

    pub(super) fn mark_read_by(
        &mut self,
        reader: &user::Id,
        now: DateTime<Utc>,
    ) -> super::Result<usize> {
        if !self.participants.contains(reader) {
            return Err(super::Error::NotParticipant(self.id));
        }

        let mut transitioned = 0;
        for m in self
            .messages
            .iter_mut()
            .filter(|m| !m.read && m.sender_id != *reader)
        {
            m.read = true;
            transitioned += 1;
        }

        if transitioned > 0 {
            self.updated_at = self.updated_at.max(now);
        }

        Ok(transitioned)
    }
}

/// Current time at the microsecond precision postgres stores, so stored and
/// returned values compare equal.
pub(super) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Sequence number and timestamp of the next message given the current tail.
/// The timestamp never goes below the tail's, even if the clock does.
pub(super) fn next_position(
    tail: Option<(i64, DateTime<Utc>)>,
    now: DateTime<Utc>,
) -> (i64, DateTime<Utc>) {
    match tail {
        Some((seq, timestamp)) => (seq + 1, now.max(timestamp)),
        None => (1, now),
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    id: Id,
    other_participant: user::Id,
    last_message: Option<LastMessage>,
    updated_at: DateTime<Utc>,
    unread_count: usize,
}

impl ConversationSummary {
    pub(super) fn new(
        id: Id,
        other_participant: user::Id,
        last_message: Option<LastMessage>,
        updated_at: DateTime<Utc>,
        unread_count: usize,
    ) -> Self {
        Self {
            id,
            other_participant,
            last_message,
            updated_at,
            unread_count,
        }
    }

    pub const fn id(&self) -> &Id {
        &self.id
    }

    pub const fn other_participant(&self) -> &user::Id {
        &self.other_participant
    }

    pub const fn last_message(&self) -> Option<&LastMessage> {
        self.last_message.as_ref()
    }

    pub const fn updated_at(&self) -> &DateTime<Utc> {
        &self.updated_at
    }

    pub const fn unread_count(&self) -> usize {
        self.unread_count
    }
}
