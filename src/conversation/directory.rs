use async_trait::async_trait;
use log::info;
use tokio::try_join;

use crate::user;

use super::Repository;
use super::model::{Conversation, Participants};

/// Outcome of resolving the conversation of a pair of principals.
#[derive(Clone, Debug)]
pub struct Resolved {
    pub conversation: Conversation,
    pub already_existed: bool,
}

#[async_trait]
pub trait ConversationDirectory {
    /// Finds the single conversation between `initiator` and `receiver`,
    /// creating it when the pair has never talked before.
    async fn find_or_create(
        &self,
        initiator: &user::Id,
        receiver: &user::Id,
    ) -> super::Result<Resolved>;
}

#[derive(Clone)]
pub struct ConversationDirectoryImpl {
    repo: Repository,
    user_service: user::Service,
}

impl ConversationDirectoryImpl {
    pub fn new(repo: Repository, user_service: user::Service) -> Self {
        Self { repo, user_service }
    }
}

#[async_trait]
impl ConversationDirectory for ConversationDirectoryImpl {
    async fn find_or_create(
        &self,
        initiator: &user::Id,
        receiver: &user::Id,
    ) -> super::Result<Resolved> {
        let participants = Participants::new(*initiator, *receiver)?;

        try_join!(
            self.user_service.check_exists(initiator),
            self.user_service.check_exists(receiver),
        )?;

        let (conversation, created) = self.repo.find_or_create(&participants).await?;
        if created {
            info!(
                "conversation {} created between {initiator} and {receiver}",
                conversation.id()
            );
        }

        Ok(Resolved {
            conversation,
            already_existed: !created,
        })
    }
}
