use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, error};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::conversation::directory::Resolved;
use crate::conversation::model::{Conversation, LastMessage, Message, NewMessage};
use crate::event::model::{Event, Notification, SessionId};
use crate::{conversation, event, user};

/// Sequences durable writes before anything is published, so a client that
/// sees an event can always read the state it describes.
pub struct DeliveryCoordinator {
    conversation_service: conversation::Service,
    directory: conversation::Directory,
    receipts: conversation::Receipts,
    bus: event::Bus,
    notifier: event::Notifier,
    sequencer: Sequencer,
}

/// Per-conversation locks held from append until the event is published, so
/// live `message_received` events leave in log order.
#[derive(Default)]
struct Sequencer {
    locks: Mutex<HashMap<conversation::Id, Arc<Mutex<()>>>>,
}

impl Sequencer {
    async fn acquire(&self, id: &conversation::Id) -> OwnedMutexGuard<()> {
        let lock = self.locks.lock().await.entry(*id).or_default().clone();
        lock.lock_owned().await
    }

    async fn release(&self, id: &conversation::Id, guard: OwnedMutexGuard<()>) {
        drop(guard);

        let mut locks = self.locks.lock().await;
        if locks.get(id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(id);
        }
    }
}

impl DeliveryCoordinator {
    pub fn new(
        conversation_service: conversation::Service,
        directory: conversation::Directory,
        receipts: conversation::Receipts,
        bus: event::Bus,
        notifier: event::Notifier,
    ) -> Self {
        Self {
            conversation_service,
            directory,
            receipts,
            bus,
            notifier,
            sequencer: Sequencer::default(),
        }
    }
}

impl DeliveryCoordinator {
    pub async fn send_message(
        &self,
        sender: &user::Id,
        id: &conversation::Id,
        content: String,
    ) -> conversation::Result<Message> {
        let msg = NewMessage::new(content)?;

        let guard = self.sequencer.acquire(id).await;
        let appended = self.append_and_publish(id, sender, &msg).await;
        self.sequencer.release(id, guard).await;
        let message = appended?;

        self.notify_other(
            id,
            sender,
            Notification::NewMessage {
                conversation_id: *id,
                last_message: LastMessage::from(&message),
            },
        )
        .await;

        Ok(message)
    }

    pub async fn mark_read(
        &self,
        id: &conversation::Id,
        reader: &user::Id,
    ) -> conversation::Result<usize> {
        let count = self.receipts.mark_read(id, reader).await?;
        if count == 0 {
            return Ok(0);
        }

        self.bus
            .publish(
                id,
                Event::MessagesRead {
                    conversation_id: *id,
                    reader_id: *reader,
                    count,
                },
                None,
            )
            .await;

        self.notify_other(
            id,
            reader,
            Notification::MessagesRead {
                conversation_id: *id,
                reader_id: *reader,
                count,
            },
        )
        .await;

        Ok(count)
    }

    /// Marks the conversation read for `reader`, then loads it.
    pub async fn open(
        &self,
        id: &conversation::Id,
        reader: &user::Id,
    ) -> conversation::Result<Conversation> {
        self.mark_read(id, reader).await?;
        self.conversation_service.find_by_id(id, reader).await
    }

    pub async fn create_conversation(
        &self,
        initiator: &user::Id,
        receiver: &user::Id,
    ) -> conversation::Result<Resolved> {
        let resolved = self.directory.find_or_create(initiator, receiver).await?;

        if !resolved.already_existed {
            self.notifier
                .notify(
                    receiver,
                    Notification::NewConversation {
                        conversation_id: *resolved.conversation.id(),
                        initiator: *initiator,
                    },
                )
                .await;
        }

        Ok(resolved)
    }

    pub async fn typing(
        &self,
        session: &SessionId,
        principal: &user::Id,
        id: &conversation::Id,
        started: bool,
    ) -> conversation::Result<()> {
        self.conversation_service
            .check_participant(id, principal)
            .await?;

        let event = if started {
            Event::Typing {
                conversation_id: *id,
                principal: *principal,
            }
        } else {
            Event::StopTyping {
                conversation_id: *id,
                principal: *principal,
            }
        };

        self.bus.publish(id, event, Some(session)).await;
        Ok(())
    }
}

impl DeliveryCoordinator {
    async fn append_and_publish(
        &self,
        id: &conversation::Id,
        sender: &user::Id,
        msg: &NewMessage,
    ) -> conversation::Result<Message> {
        let message = self.conversation_service.append(id, sender, msg).await?;

        self.bus
            .publish(
                id,
                Event::MessageReceived {
                    message: message.clone(),
                },
                None,
            )
            .await;

        Ok(message)
    }

    async fn notify_other(&self, id: &conversation::Id, principal: &user::Id, noti: Notification) {
        match self.conversation_service.find_participants(id).await {
            Ok(participants) => match participants.other(principal) {
                Some(other) => self.notifier.notify(other, noti).await,
                None => debug!("{principal} is not a participant of {id}, nobody to notify"),
            },
            Err(e) => error!("failed to resolve participants of {id} for notification: {e}"),
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::conversation::directory::ConversationDirectoryImpl;
    use crate::conversation::memory::InMemoryConversationRepository;
    use crate::conversation::receipt::ReadReceiptTrackerImpl;
    use crate::conversation::service::ConversationServiceImpl;
    use crate::event::gateway::Gateway;
    use crate::event::notifier::Notifier;
    use crate::user::{repository::InMemoryUserRepository, service::UserServiceImpl};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(user::Id, Notification)>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<(user::Id, Notification)> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl Notifier for Recorder {
        async fn notify(&self, recipient: &user::Id, noti: Notification) {
            self.sent.lock().unwrap().push((*recipient, noti));
        }
    }

    struct Fixture {
        coordinator: DeliveryCoordinator,
        conversation_service: conversation::Service,
        gateway: Gateway,
        recorder: Arc<Recorder>,
        buyer: user::Id,
        agent: user::Id,
    }

    fn fixture() -> Fixture {
        let buyer = user::Id::random();
        let agent = user::Id::random();

        let user_repo = InMemoryUserRepository::new([buyer, agent]);
        let user_service: user::Service = Arc::new(UserServiceImpl::new(Arc::new(user_repo)));
        let repo: conversation::Repository = Arc::new(InMemoryConversationRepository::default());
        let conversation_service: conversation::Service =
            Arc::new(ConversationServiceImpl::new(repo.clone(), None));
        let gateway = Gateway::default();
        let recorder = Arc::new(Recorder::default());

        let coordinator = DeliveryCoordinator::new(
            conversation_service.clone(),
            Arc::new(ConversationDirectoryImpl::new(repo.clone(), user_service)),
            Arc::new(ReadReceiptTrackerImpl::new(repo)),
            Arc::new(gateway.clone()),
            recorder.clone(),
        );

        Fixture {
            coordinator,
            conversation_service,
            gateway,
            recorder,
            buyer,
            agent,
        }
    }

    #[tokio::test]
    async fn should_notify_receiver_only_on_creation() {
        let f = fixture();

        let created = f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap();
        let again = f
            .coordinator
            .create_conversation(&f.agent, &f.buyer)
            .await
            .unwrap();

        assert!(!created.already_existed);
        assert!(again.already_existed);
        assert_eq!(
            f.recorder.take(),
            vec![(
                f.agent,
                Notification::NewConversation {
                    conversation_id: *created.conversation.id(),
                    initiator: f.buyer
                }
            )]
        );
    }

    #[tokio::test]
    async fn should_publish_stored_message_to_room() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        let (session, mut rx) = f.gateway.connect(f.agent).await;
        f.gateway.join(&session, &id).await;
        f.recorder.take();

        let sent = f
            .coordinator
            .send_message(&f.buyer, &id, "Hi, is it available?".into())
            .await
            .unwrap();

        let Event::MessageReceived { message } = rx.try_recv().unwrap() else {
            panic!("expected message_received");
        };
        assert_eq!(message, sent);

        let stored = f
            .conversation_service
            .find_by_id(&id, &f.agent)
            .await
            .unwrap();
        assert_eq!(stored.messages().last(), Some(&message));

        let notified = f.recorder.take();
        assert_eq!(notified.len(), 1);
        assert_eq!(notified[0].0, f.agent);
    }

    #[tokio::test]
    async fn should_publish_nothing_when_append_fails() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        let (session, mut rx) = f.gateway.connect(f.agent).await;
        f.gateway.join(&session, &id).await;
        f.recorder.take();

        let blank = f
            .coordinator
            .send_message(&f.buyer, &id, "   ".into())
            .await;
        let stranger = f
            .coordinator
            .send_message(&user::Id::random(), &id, "hello".into())
            .await;

        assert!(matches!(blank, Err(conversation::Error::EmptyContent)));
        assert!(matches!(
            stranger,
            Err(conversation::Error::NotParticipant(_))
        ));
        assert!(rx.try_recv().is_err());
        assert!(f.recorder.take().is_empty());
    }

    #[tokio::test]
    async fn should_open_and_broadcast_read_once() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        f.coordinator
            .send_message(&f.buyer, &id, "first".into())
            .await
            .unwrap();
        f.coordinator
            .send_message(&f.buyer, &id, "second".into())
            .await
            .unwrap();
        let (session, mut rx) = f.gateway.connect(f.buyer).await;
        f.gateway.join(&session, &id).await;
        f.recorder.take();

        let opened = f.coordinator.open(&id, &f.agent).await.unwrap();
        let reopened = f.coordinator.open(&id, &f.agent).await.unwrap();

        assert!(opened.messages().iter().all(|m| m.read()));
        assert_eq!(opened.unread_count(&f.agent), 0);
        assert_eq!(reopened.messages().len(), 2);
        assert_eq!(
            rx.try_recv().unwrap(),
            Event::MessagesRead {
                conversation_id: id,
                reader_id: f.agent,
                count: 2
            }
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(f.recorder.take().len(), 1);
    }

    #[tokio::test]
    async fn should_not_mark_own_messages_read() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        f.coordinator
            .send_message(&f.buyer, &id, "ping".into())
            .await
            .unwrap();

        let count = f.coordinator.mark_read(&id, &f.buyer).await.unwrap();

        assert_eq!(count, 0);
        let summaries = f
            .conversation_service
            .list_for_principal(&f.agent)
            .await
            .unwrap();
        assert_eq!(summaries[0].unread_count(), 1);
    }

    #[tokio::test]
    async fn should_forbid_read_mark_by_stranger() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();

        let stranger = f.coordinator.mark_read(&id, &user::Id::random()).await;
        let missing = f
            .coordinator
            .mark_read(&conversation::Id::random(), &f.agent)
            .await;

        assert!(matches!(
            stranger,
            Err(conversation::Error::NotParticipant(_))
        ));
        assert!(matches!(missing, Err(conversation::Error::NotFound(_))));
    }

    #[tokio::test]
    async fn should_exclude_typist_session() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        let (typist, mut typist_rx) = f.gateway.connect(f.buyer).await;
        let (watcher, mut watcher_rx) = f.gateway.connect(f.agent).await;
        f.gateway.join(&typist, &id).await;
        f.gateway.join(&watcher, &id).await;

        f.coordinator
            .typing(&typist, &f.buyer, &id, true)
            .await
            .unwrap();
        f.coordinator
            .typing(&typist, &f.buyer, &id, false)
            .await
            .unwrap();

        assert!(typist_rx.try_recv().is_err());
        assert_eq!(
            watcher_rx.try_recv().unwrap(),
            Event::Typing {
                conversation_id: id,
                principal: f.buyer
            }
        );
        assert_eq!(
            watcher_rx.try_recv().unwrap(),
            Event::StopTyping {
                conversation_id: id,
                principal: f.buyer
            }
        );
    }

    #[tokio::test]
    async fn should_reject_typing_from_stranger() {
        let f = fixture();
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        let stranger = user::Id::random();
        let (session, _rx) = f.gateway.connect(stranger).await;

        let res = f.coordinator.typing(&session, &stranger, &id, true).await;

        assert!(matches!(res, Err(conversation::Error::NotParticipant(_))));
    }

    #[tokio::test]
    async fn should_keep_racing_messages_in_call_order_per_sender() {
        let f = Arc::new(fixture());
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();

        let buyer_side = {
            let f = f.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    f.coordinator
                        .send_message(&f.buyer, &id, format!("buyer {i}"))
                        .await
                        .unwrap();
                }
            })
        };
        let agent_side = {
            let f = f.clone();
            tokio::spawn(async move {
                for i in 0..20 {
                    f.coordinator
                        .send_message(&f.agent, &id, format!("agent {i}"))
                        .await
                        .unwrap();
                }
            })
        };
        buyer_side.await.unwrap();
        agent_side.await.unwrap();

        let c = f.conversation_service.find_by_id(&id, &f.buyer).await.unwrap();
        let from_buyer = c
            .messages()
            .iter()
            .filter(|m| m.sender_id() == &f.buyer)
            .map(|m| m.content().to_string())
            .collect::<Vec<_>>();

        assert_eq!(c.messages().len(), 40);
        assert_eq!(
            from_buyer,
            (0..20).map(|i| format!("buyer {i}")).collect::<Vec<_>>()
        );
        assert_eq!(
            c.last_message().unwrap().content(),
            c.messages().last().unwrap().content()
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_publish_concurrent_messages_in_log_order() {
        let f = Arc::new(fixture());
        let id = *f
            .coordinator
            .create_conversation(&f.buyer, &f.agent)
            .await
            .unwrap()
            .conversation
            .id();
        let (session, mut rx) = f.gateway.connect(f.agent).await;
        f.gateway.join(&session, &id).await;

        let handles = (0..200)
            .map(|i| {
                let f = f.clone();
                tokio::spawn(async move {
                    let sender = if i % 2 == 0 { f.buyer } else { f.agent };
                    f.coordinator
                        .send_message(&sender, &id, format!("offer {i}"))
                        .await
                        .unwrap()
                })
            })
            .collect::<Vec<_>>();
        for h in handles {
            h.await.unwrap();
        }

        let mut received = Vec::new();
        while let Ok(event) = rx.try_recv() {
            let Event::MessageReceived { message } = event else {
                panic!("expected message_received, got {event:?}");
            };
            received.push(message.seq());
        }

        assert_eq!(received, (1..=200).collect::<Vec<i64>>());
        assert!(f.coordinator.sequencer.locks.lock().await.is_empty());
    }
}
