use async_trait::async_trait;

use super::{Id, Repository};

#[async_trait]
pub trait UserService {
    /// Fails with `NotFound` unless the principal resolves.
    async fn check_exists(&self, id: &Id) -> super::Result<()>;
}

#[derive(Clone)]
pub struct UserServiceImpl {
    repo: Repository,
}

impl UserServiceImpl {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }
}

#[async_trait]
impl UserService for UserServiceImpl {
    async fn check_exists(&self, id: &Id) -> super::Result<()> {
        if self.repo.exists(id).await? {
            Ok(())
        } else {
            Err(super::Error::NotFound(*id))
        }
    }
}
