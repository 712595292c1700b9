use std::collections::HashSet;

use async_trait::async_trait;
use log::debug;
use uuid::Uuid;

use crate::integration::cache;
use crate::user;

use super::model::{Conversation, ConversationSummary, Message, NewMessage, Participants};
use super::{Id, Repository};

#[async_trait]
pub trait ConversationService {
    /// Full conversation with its messages in order. Only participants may read it.
    async fn find_by_id(&self, id: &Id, principal: &user::Id) -> super::Result<Conversation>;

    async fn append(
        &self,
        id: &Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> super::Result<Message>;

    async fn list_for_principal(
        &self,
        principal: &user::Id,
    ) -> super::Result<Vec<ConversationSummary>>;

    async fn find_participants(&self, id: &Id) -> super::Result<Participants>;

    async fn check_participant(&self, id: &Id, principal: &user::Id) -> super::Result<()>;
}

#[derive(Clone)]
pub struct ConversationServiceImpl {
    repo: Repository,
    redis: Option<cache::Redis>,
}

impl ConversationServiceImpl {
    pub fn new(repo: Repository, redis: Option<cache::Redis>) -> Self {
        Self { repo, redis }
    }
}

#[async_trait]
impl ConversationService for ConversationServiceImpl {
    async fn find_by_id(&self, id: &Id, principal: &user::Id) -> super::Result<Conversation> {
        let conversation = self
            .repo
            .find_by_id(id)
            .await?
            .ok_or(super::Error::NotFound(*id))?;

        if !conversation.participants().contains(principal) {
            return Err(super::Error::NotParticipant(*id));
        }

        Ok(conversation)
    }

    async fn append(
        &self,
        id: &Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> super::Result<Message> {
        let message = self.repo.append(id, sender, msg).await?;
        debug!(
            "message {} appended to conversation {id} at position {}",
            message.id(),
            message.seq()
        );
        Ok(message)
    }

    async fn list_for_principal(
        &self,
        principal: &user::Id,
    ) -> super::Result<Vec<ConversationSummary>> {
        self.repo.find_by_participant(principal).await
    }

    async fn find_participants(&self, id: &Id) -> super::Result<Participants> {
        find_participants(self.redis.as_ref(), &self.repo, id).await
    }

    async fn check_participant(&self, id: &Id, principal: &user::Id) -> super::Result<()> {
        let participants = self.find_participants(id).await?;

        if !participants.contains(principal) {
            return Err(super::Error::NotParticipant(*id));
        }

        Ok(())
    }
}

/// Participants never change once a conversation exists, so a cached pair stays valid.
async fn find_participants(
    redis: Option<&cache::Redis>,
    repo: &Repository,
    id: &Id,
) -> super::Result<Participants> {
    let key = cache::Key::Participants(*id);

    if let Some(redis) = redis {
        let cached = redis.smembers::<HashSet<String>>(&key).await;
        if let Some(participants) = cached.and_then(parse_cached) {
            return Ok(participants);
        }
    }

    let participants = repo
        .find_participants(id)
        .await?
        .ok_or(super::Error::NotFound(*id))?;

    if let Some(redis) = redis {
        let members = participants
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        redis.sadd(&key, members).await;
    }

    Ok(participants)
}

fn parse_cached(members: HashSet<String>) -> Option<Participants> {
    let ids = members
        .iter()
        .map(|m| m.parse::<Uuid>().map(user::Id::from))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;

    match ids.as_slice() {
        [a, b] => Participants::new(*a, *b).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use crate::conversation::{self, memory::InMemoryConversationRepository};

    use super::*;

    async fn setup() -> (ConversationServiceImpl, Id, user::Id, user::Id) {
        let repo: Repository = Arc::new(InMemoryConversationRepository::default());
        let jora = user::Id::random();
        let valera = user::Id::random();
        let (c, _) = repo
            .find_or_create(&Participants::new(jora, valera).unwrap())
            .await
            .unwrap();

        (ConversationServiceImpl::new(repo, None), *c.id(), jora, valera)
    }

    #[tokio::test]
    async fn should_find_conversation_for_participant() {
        let (service, id, jora, valera) = setup().await;
        service
            .append(&id, &valera, &NewMessage::new("is it still available?").unwrap())
            .await
            .unwrap();

        let c = service.find_by_id(&id, &jora).await.unwrap();

        assert_eq!(c.messages().len(), 1);
        assert_eq!(c.messages()[0].content(), "is it still available?");
    }

    #[tokio::test]
    async fn should_forbid_stranger() {
        let (service, id, _, _) = setup().await;
        let igor = user::Id::random();

        let res = service.find_by_id(&id, &igor).await;
        let check = service.check_participant(&id, &igor).await;

        assert!(matches!(res, Err(conversation::Error::NotParticipant(_))));
        assert!(matches!(check, Err(conversation::Error::NotParticipant(_))));
    }

    #[tokio::test]
    async fn should_not_find_missing_conversation() {
        let (service, _, jora, _) = setup().await;

        let res = service.find_by_id(&Id::random(), &jora).await;
        let participants = service.find_participants(&Id::random()).await;

        assert!(matches!(res, Err(conversation::Error::NotFound(_))));
        assert!(matches!(
            participants,
            Err(conversation::Error::NotFound(_))
        ));
    }

    #[test]
    fn should_parse_cached_pair() {
        let jora = user::Id::random();
        let valera = user::Id::random();
        let cached = HashSet::from([jora.to_string(), valera.to_string()]);

        let participants = parse_cached(cached).unwrap();

        assert_eq!(participants, Participants::new(jora, valera).unwrap());
    }

    #[test]
    fn should_treat_malformed_cache_entry_as_miss() {
        assert!(parse_cached(HashSet::new()).is_none());
        assert!(parse_cached(HashSet::from(["nope".to_string()])).is_none());
    }
}
