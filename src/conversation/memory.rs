use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::user;

use super::Id;
use super::model::{Conversation, ConversationSummary, Message, NewMessage, Participants, now};
use super::repository::ConversationRepository;

/// Conversation store kept in process memory. Every conversation sits behind
/// its own mutex, which serializes appends and read-marks per conversation.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    by_id: HashMap<Id, Arc<Mutex<Conversation>>>,
    by_participants: HashMap<Participants, Id>,
}

impl InMemoryConversationRepository {
    async fn find_entry(&self, id: &Id) -> Option<Arc<Mutex<Conversation>>> {
        self.inner.read().await.by_id.get(id).cloned()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn find_or_create(
        &self,
        participants: &Participants,
    ) -> super::Result<(Conversation, bool)> {
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.by_participants.get(participants) {
            if let Some(entry) = inner.by_id.get(id) {
                let existing = entry.lock().await.clone();
                return Ok((existing, false));
            }
        }

        let conversation = Conversation::new(Id::random(), *participants, now());
        let id = *conversation.id();
        inner.by_participants.insert(*participants, id);
        inner
            .by_id
            .insert(id, Arc::new(Mutex::new(conversation.clone())));

        Ok((conversation, true))
    }

    async fn find_by_id(&self, id: &Id) -> super::Result<Option<Conversation>> {
        match self.find_entry(id).await {
            Some(entry) => Ok(Some(entry.lock().await.clone())),
            None => Ok(None),
        }
    }

    async fn find_participants(&self, id: &Id) -> super::Result<Option<Participants>> {
        match self.find_entry(id).await {
            Some(entry) => Ok(Some(*entry.lock().await.participants())),
            None => Ok(None),
        }
    }

    async fn find_by_participant(
        &self,
        principal: &user::Id,
    ) -> super::Result<Vec<ConversationSummary>> {
        let entries = {
            let inner = self.inner.read().await;
            inner
                .by_participants
                .iter()
                .filter(|(p, _)| p.contains(principal))
                .filter_map(|(_, id)| inner.by_id.get(id).cloned())
                .collect::<Vec<_>>()
        };

        let mut summaries = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Some(s) = entry.lock().await.summary(principal) {
                summaries.push(s);
            }
        }

        summaries.sort_by(|a, b| {
            b.updated_at()
                .cmp(a.updated_at())
                .then_with(|| a.id().get().cmp(b.id().get()))
        });

        Ok(summaries)
    }

    async fn append(
        &self,
        id: &Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> super::Result<Message> {
        let entry = self
            .find_entry(id)
            .await
            .ok_or(super::Error::NotFound(*id))?;

        let mut conversation = entry.lock().await;
        conversation.append(sender, msg, now())
    }

    async fn mark_read(&self, id: &Id, reader: &user::Id) -> super::Result<usize> {
        let entry = self
            .find_entry(id)
            .await
            .ok_or(super::Error::NotFound(*id))?;

        let mut conversation = entry.lock().await;
        conversation.mark_read_by(reader, now())
    }
}
