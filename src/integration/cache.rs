use std::env;
use std::fmt;

use log::{error, warn};
use redis::{AsyncCommands, FromRedisValue, ToRedisArgs};

use crate::conversation;

const DEFAULT_TTL_SECONDS: i64 = 3600;

#[derive(Clone)]
pub struct Config {
    host: String,
    port: u16,
}

impl Config {
    pub fn env() -> Option<Self> {
        let host = env::var("REDIS_HOST").ok();
        let port = env::var("REDIS_PORT")
            .unwrap_or_else(|_| "6379".to_string())
            .parse()
            .ok();

        if let (Some(host), Some(port)) = (host, port) {
            Some(Self { host, port })
        } else {
            warn!("Redis env is not configured, participant cache disabled");
            None
        }
    }

    pub async fn connect(&self) -> super::Result<Redis> {
        let con = redis::Client::open(format!("redis://{}:{}", self.host, self.port))?
            .get_connection_manager()
            .await?;

        Ok(Redis { con })
    }
}

#[derive(Clone, Debug)]
pub enum Key {
    Participants(conversation::Id),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Participants(id) => write!(f, "conversation:{id}:participants"),
        }
    }
}

/// Thin best-effort wrapper: cache failures are logged and treated as misses.
#[derive(Clone)]
pub struct Redis {
    con: redis::aio::ConnectionManager,
}

impl Redis {
    pub async fn smembers<T: FromRedisValue>(&self, key: &Key) -> Option<T> {
        let mut con = self.con.clone();
        match con.smembers::<_, T>(key.to_string()).await {
            Ok(members) => Some(members),
            Err(e) => {
                error!("failed to read {key} from cache: {e}");
                None
            }
        }
    }

    pub async fn sadd<V: ToRedisArgs + Send + Sync>(&self, key: &Key, values: V) {
        let mut con = self.con.clone();
        if let Err(e) = con.sadd::<_, _, ()>(key.to_string(), values).await {
            error!("failed to write {key} to cache: {e}");
            return;
        }

        if let Err(e) = con
            .expire::<_, ()>(key.to_string(), DEFAULT_TTL_SECONDS)
            .await
        {
            error!("failed to set ttl of {key}: {e}");
        }
    }
}
