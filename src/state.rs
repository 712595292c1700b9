use std::sync::Arc;

use axum::extract::FromRef;
use log::{info, warn};

use crate::conversation::directory::ConversationDirectoryImpl;
use crate::conversation::memory::InMemoryConversationRepository;
use crate::conversation::receipt::ReadReceiptTrackerImpl;
use crate::conversation::repository::PgConversationRepository;
use crate::conversation::service::ConversationServiceImpl;
use crate::delivery::service::DeliveryCoordinator;
use crate::event::gateway::Gateway;
use crate::event::notifier::{NatsNotifier, Silent};
use crate::integration::{self, Storage, cache, db};
use crate::user::repository::{InMemoryUserRepository, PgUserRepository};
use crate::user::service::UserServiceImpl;
use crate::{conversation, delivery, event, user};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub conversation_service: conversation::Service,
    pub gateway: Gateway,
    pub delivery: delivery::Coordinator,
}

impl AppState {
    pub async fn init(config: &integration::Config) -> crate::Result<Self> {
        let (user_repo, conversation_repo): (user::Repository, conversation::Repository) =
            match &config.storage {
                Storage::Postgres(db_config) => {
                    let pool = db_config.connect()?;
                    db::migrate(&pool).await?;
                    info!("Using postgres storage");
                    (
                        Arc::new(PgUserRepository::new(pool.clone())),
                        Arc::new(PgConversationRepository::new(pool)),
                    )
                }
                Storage::Memory { principals } => {
                    warn!("Using in-memory storage, state is lost on restart");
                    (
                        Arc::new(InMemoryUserRepository::new(principals.iter().copied())),
                        Arc::new(InMemoryConversationRepository::default()),
                    )
                }
            };

        let redis = match &config.redis {
            Some(c) => Some(c.connect().await?),
            None => None,
        };

        let notifier: event::Notifier = match &config.pubsub {
            Some(c) => Arc::new(NatsNotifier::new(c.connect().await?)),
            None => Arc::new(Silent),
        };

        Ok(Self::assemble(user_repo, conversation_repo, redis, notifier))
    }

    /// Memory-backed state with the given principals registered and
    /// notifications switched off.
    pub fn in_memory(principals: impl IntoIterator<Item = user::Id>) -> Self {
        Self::assemble(
            Arc::new(InMemoryUserRepository::new(principals)),
            Arc::new(InMemoryConversationRepository::default()),
            None,
            Arc::new(Silent),
        )
    }

    fn assemble(
        user_repo: user::Repository,
        conversation_repo: conversation::Repository,
        redis: Option<cache::Redis>,
        notifier: event::Notifier,
    ) -> Self {
        let user_service: user::Service = Arc::new(UserServiceImpl::new(user_repo));
        let conversation_service: conversation::Service = Arc::new(ConversationServiceImpl::new(
            conversation_repo.clone(),
            redis,
        ));
        let gateway = Gateway::default();

        let delivery = Arc::new(DeliveryCoordinator::new(
            conversation_service.clone(),
            Arc::new(ConversationDirectoryImpl::new(
                conversation_repo.clone(),
                user_service,
            )),
            Arc::new(ReadReceiptTrackerImpl::new(conversation_repo)),
            Arc::new(gateway.clone()),
            notifier,
        ));

        Self {
            conversation_service,
            gateway,
            delivery,
        }
    }
}
