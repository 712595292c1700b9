use async_trait::async_trait;
use log::debug;

use crate::user;

use super::{Id, Repository};

#[async_trait]
pub trait ReadReceiptTracker {
    /// Marks every unread message sent by the other participant as read and
    /// returns how many transitioned. Repeated calls return 0.
    async fn mark_read(&self, id: &Id, reader: &user::Id) -> super::Result<usize>;
}

#[derive(Clone)]
pub struct ReadReceiptTrackerImpl {
    repo: Repository,
}

impl ReadReceiptTrackerImpl {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl ReadReceiptTracker for ReadReceiptTrackerImpl {
    async fn mark_read(&self, id: &Id, reader: &user::Id) -> super::Result<usize> {
        let count = self.repo.mark_read(id, reader).await?;
        if count > 0 {
            debug!("{reader} read {count} message(s) in conversation {id}");
        }
        Ok(count)
    }
}
