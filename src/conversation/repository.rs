use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::integration::db;
use crate::schema::{conversations, messages};
use crate::user;

use super::model::{
    Conversation, ConversationSummary, LastMessage, Message, NewMessage, Participants,
    next_position, now,
};
use super::{Id, MessageId};

#[async_trait]
pub trait ConversationRepository {
    /// Returns the conversation of the pair and whether this call created it.
    /// Concurrent calls for the same pair converge on a single conversation.
    async fn find_or_create(&self, participants: &Participants)
    -> super::Result<(Conversation, bool)>;

    async fn find_by_id(&self, id: &Id) -> super::Result<Option<Conversation>>;

    async fn find_participants(&self, id: &Id) -> super::Result<Option<Participants>>;

    /// Summaries of every conversation of `principal`, most recently updated first.
    async fn find_by_participant(
        &self,
        principal: &user::Id,
    ) -> super::Result<Vec<ConversationSummary>>;

    /// Appends atomically with the last message and `updated_at` update.
    /// Appends to the same conversation are serialized.
    async fn append(
        &self,
        id: &Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> super::Result<Message>;

    /// Flips every unread message not sent by `reader` in one step.
    async fn mark_read(&self, id: &Id, reader: &user::Id) -> super::Result<usize>;
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = conversations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct ConversationRow {
    id: Uuid,
    participant_lo: Uuid,
    participant_hi: Uuid,
    last_message_content: Option<String>,
    last_message_sender: Option<Uuid>,
    last_message_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl ConversationRow {
    fn participants(&self) -> super::Result<Participants> {
        Participants::new(self.participant_lo.into(), self.participant_hi.into())
    }

    fn last_message(&self) -> Option<LastMessage> {
        match (
            &self.last_message_content,
            self.last_message_sender,
            self.last_message_at,
        ) {
            (Some(content), Some(sender), Some(at)) => {
                Some(LastMessage::new(content.as_str(), sender.into(), at))
            }
            _ => None,
        }
    }

    fn into_conversation(self, messages: Vec<MessageRow>) -> super::Result<Conversation> {
        let participants = self.participants()?;
        let last_message = self.last_message();

        Ok(Conversation::from_parts(
            self.id.into(),
            participants,
            messages.into_iter().map(Message::from).collect(),
            last_message,
            self.updated_at,
        ))
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = messages)]
#[diesel(check_for_backend(diesel::pg::Pg))]
struct MessageRow {
    id: Uuid,
    conversation_id: Uuid,
    seq: i64,
    sender: Uuid,
    content: String,
    created_at: DateTime<Utc>,
    seen: bool,
}

impl From<MessageRow> for Message {
    fn from(r: MessageRow) -> Self {
        Message::new(
            MessageId::from(r.id),
            Id::from(r.conversation_id),
            r.seq,
            user::Id::from(r.sender),
            r.content,
            r.created_at,
            r.seen,
        )
    }
}

#[derive(Insertable)]
#[diesel(table_name = conversations)]
struct NewConversationRow<'a> {
    id: &'a Uuid,
    participant_lo: &'a Uuid,
    participant_hi: &'a Uuid,
    updated_at: DateTime<Utc>,
}

#[derive(Insertable)]
#[diesel(table_name = messages)]
struct NewMessageRow<'a> {
    id: Uuid,
    conversation_id: &'a Uuid,
    seq: i64,
    sender: &'a Uuid,
    content: &'a str,
    created_at: DateTime<Utc>,
    seen: bool,
}

pub struct PgConversationRepository {
    pool: db::Pool,
}

impl PgConversationRepository {
    pub fn new(pool: db::Pool) -> Self {
        Self { pool }
    }

    async fn run<T, F>(&self, f: F) -> super::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut PgConnection) -> super::Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut *conn)
        })
        .await?
    }
}

fn load_conversation(conn: &mut PgConnection, id: &Uuid) -> super::Result<Option<Conversation>> {
    let row = conversations::table
        .find(id)
        .select(ConversationRow::as_select())
        .first(conn)
        .optional()?;

    let Some(row) = row else {
        return Ok(None);
    };

    let messages = messages::table
        .filter(messages::conversation_id.eq(id))
        .order(messages::seq.asc())
        .select(MessageRow::as_select())
        .load(conn)?;

    row.into_conversation(messages).map(Some)
}

/// Locks the conversation row for the rest of the transaction.
fn lock_conversation(conn: &mut PgConnection, id: &Uuid) -> super::Result<ConversationRow> {
    conversations::table
        .find(id)
        .select(ConversationRow::as_select())
        .for_update()
        .get_result(conn)
        .optional()?
        .ok_or(super::Error::NotFound(Id::from(*id)))
}

#[async_trait]
impl ConversationRepository for PgConversationRepository {
    async fn find_or_create(
        &self,
        participants: &Participants,
    ) -> super::Result<(Conversation, bool)> {
        let lo = *participants.lo().get();
        let hi = *participants.hi().get();

        self.run(move |conn| {
            conn.transaction(|conn| -> super::Result<(Conversation, bool)> {
                let inserted = diesel::insert_into(conversations::table)
                    .values(&NewConversationRow {
                        id: &Uuid::new_v4(),
                        participant_lo: &lo,
                        participant_hi: &hi,
                        updated_at: now(),
                    })
                    .on_conflict((conversations::participant_lo, conversations::participant_hi))
                    .do_nothing()
                    .execute(conn)?;

                let id = conversations::table
                    .filter(conversations::participant_lo.eq(&lo))
                    .filter(conversations::participant_hi.eq(&hi))
                    .select(conversations::id)
                    .first::<Uuid>(conn)?;

                let conversation =
                    load_conversation(conn, &id)?.ok_or(super::Error::NotFound(Id::from(id)))?;

                Ok((conversation, inserted == 1))
            })
        })
        .await
    }

    async fn find_by_id(&self, id: &Id) -> super::Result<Option<Conversation>> {
        let id = *id.get();
        self.run(move |conn| load_conversation(conn, &id)).await
    }

    async fn find_participants(&self, id: &Id) -> super::Result<Option<Participants>> {
        let id = *id.get();

        self.run(move |conn| {
            let pair = conversations::table
                .find(&id)
                .select((conversations::participant_lo, conversations::participant_hi))
                .first::<(Uuid, Uuid)>(conn)
                .optional()?;

            pair.map(|(lo, hi)| Participants::new(lo.into(), hi.into()))
                .transpose()
        })
        .await
    }

    async fn find_by_participant(
        &self,
        principal: &user::Id,
    ) -> super::Result<Vec<ConversationSummary>> {
        let principal = *principal;
        let p = *principal.get();

        self.run(move |conn| {
            let rows = conversations::table
                .filter(
                    conversations::participant_lo
                        .eq(&p)
                        .or(conversations::participant_hi.eq(&p)),
                )
                .order((conversations::updated_at.desc(), conversations::id.asc()))
                .select(ConversationRow::as_select())
                .load(conn)?;

            let ids = rows.iter().map(|r| r.id).collect::<Vec<_>>();
            let unread = messages::table
                .filter(messages::conversation_id.eq_any(ids))
                .filter(messages::sender.ne(&p))
                .filter(messages::seen.eq(false))
                .group_by(messages::conversation_id)
                .select((messages::conversation_id, diesel::dsl::count_star()))
                .load::<(Uuid, i64)>(conn)?
                .into_iter()
                .collect::<HashMap<_, _>>();

            let mut summaries = Vec::with_capacity(rows.len());
            for row in rows {
                let participants = row.participants()?;
                let Some(other) = participants.other(&principal) else {
                    continue;
                };

                summaries.push(ConversationSummary::new(
                    row.id.into(),
                    *other,
                    row.last_message(),
                    row.updated_at,
                    unread.get(&row.id).copied().unwrap_or_default() as usize,
                ));
            }

            Ok(summaries)
        })
        .await
    }

    async fn append(
        &self,
        id: &Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> super::Result<Message> {
        let conversation_id = *id.get();
        let sender = *sender;
        let content = msg.content().to_owned();

        self.run(move |conn| {
            conn.transaction(|conn| -> super::Result<Message> {
                let row = lock_conversation(conn, &conversation_id)?;
                if !row.participants()?.contains(&sender) {
                    return Err(super::Error::NotParticipant(row.id.into()));
                }

                let tail = messages::table
                    .filter(messages::conversation_id.eq(&conversation_id))
                    .order(messages::seq.desc())
                    .select((messages::seq, messages::created_at))
                    .first::<(i64, DateTime<Utc>)>(conn)
                    .optional()?;
                let (seq, timestamp) = next_position(tail, now());

                let new_message = NewMessageRow {
                    id: Uuid::new_v4(),
                    conversation_id: &conversation_id,
                    seq,
                    sender: sender.get(),
                    content: &content,
                    created_at: timestamp,
                    seen: false,
                };
                diesel::insert_into(messages::table)
                    .values(&new_message)
                    .execute(conn)?;

                diesel::update(conversations::table.find(&conversation_id))
                    .set((
                        conversations::last_message_content.eq(Some(content.clone())),
                        conversations::last_message_sender.eq(Some(*sender.get())),
                        conversations::last_message_at.eq(Some(timestamp)),
                        conversations::updated_at.eq(row.updated_at.max(timestamp)),
                    ))
                    .execute(conn)?;

                Ok(Message::new(
                    MessageId::from(new_message.id),
                    Id::from(conversation_id),
                    seq,
                    sender,
                    content.as_str(),
                    timestamp,
                    false,
                ))
            })
        })
        .await
    }

    async fn mark_read(&self, id: &Id, reader: &user::Id) -> super::Result<usize> {
        let conversation_id = *id.get();
        let reader = *reader;

        self.run(move |conn| {
            conn.transaction(|conn| -> super::Result<usize> {
                let row = lock_conversation(conn, &conversation_id)?;
                if !row.participants()?.contains(&reader) {
                    return Err(super::Error::NotParticipant(row.id.into()));
                }

                let transitioned = diesel::update(
                    messages::table
                        .filter(messages::conversation_id.eq(&conversation_id))
                        .filter(messages::sender.ne(reader.get()))
                        .filter(messages::seen.eq(false)),
                )
                .set(messages::seen.eq(true))
                .execute(conn)?;

                if transitioned > 0 {
                    diesel::update(conversations::table.find(&conversation_id))
                        .set(conversations::updated_at.eq(row.updated_at.max(now())))
                        .execute(conn)?;
                }

                Ok(transitioned)
            })
        })
        .await
    }
}
