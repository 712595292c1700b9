use std::collections::HashSet;

use async_trait::async_trait;
use diesel::dsl::exists;
use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl};
use tokio::sync::RwLock;

use crate::integration::db;
use crate::schema::users;

use super::Id;

#[async_trait]
pub trait UserRepository {
    async fn exists(&self, id: &Id) -> super::Result<bool>;
}

pub struct PgUserRepository {
    pool: db::Pool,
}

impl PgUserRepository {
    pub fn new(pool: db::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn exists(&self, id: &Id) -> super::Result<bool> {
        let pool = self.pool.clone();
        let id = *id.get();

        tokio::task::spawn_blocking(move || -> super::Result<bool> {
            let mut conn = pool.get()?;

            let found = diesel::select(exists(users::table.filter(users::id.eq(id))))
                .get_result::<bool>(&mut conn)?;

            Ok(found)
        })
        .await?
    }
}

/// Principal set held in memory, for `STORAGE=memory` and tests.
#[derive(Default)]
pub struct InMemoryUserRepository {
    ids: RwLock<HashSet<Id>>,
}

impl InMemoryUserRepository {
    pub fn new(ids: impl IntoIterator<Item = Id>) -> Self {
        Self {
            ids: RwLock::new(ids.into_iter().collect()),
        }
    }

    pub async fn insert(&self, id: Id) {
        self.ids.write().await.insert(id);
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn exists(&self, id: &Id) -> super::Result<bool> {
        Ok(self.ids.read().await.contains(id))
    }
}
