use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, error};

use crate::integration::pubsub;
use crate::user;

use super::model::Notification;

#[async_trait]
pub trait Notifier {
    /// Hands `noti` to the external push pipeline of `recipient`. Never fails:
    /// publishing problems are logged.
    async fn notify(&self, recipient: &user::Id, noti: Notification);
}

/// Publishes notifications to the `noti.{principal}` NATS subject.
#[derive(Clone)]
pub struct NatsNotifier {
    pubsub: async_nats::Client,
}

impl NatsNotifier {
    pub fn new(pubsub: async_nats::Client) -> Self {
        Self { pubsub }
    }
}

#[async_trait]
impl Notifier for NatsNotifier {
    async fn notify(&self, recipient: &user::Id, noti: Notification) {
        let payload = match serde_json::to_vec(&noti) {
            Ok(payload) => payload,
            Err(e) => {
                error!("failed to serialize notification: {e}");
                return;
            }
        };

        let subject = pubsub::Subject::Notifications(recipient);
        if let Err(e) = self.pubsub.publish(&subject, Bytes::from(payload)).await {
            error!("failed to publish notification to {recipient}: {e}");
        }
    }
}

/// Used when no pub/sub is configured.
#[derive(Clone, Default)]
pub struct Silent;

#[async_trait]
impl Notifier for Silent {
    async fn notify(&self, recipient: &user::Id, noti: Notification) {
        debug!("notification for {recipient} skipped: {noti:?}");
    }
}
