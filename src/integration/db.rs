use std::env;
use std::time::Duration;

use diesel::PgConnection;
use diesel::r2d2::ConnectionManager;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};
use log::{debug, info, warn};

pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Clone)]
pub struct Config {
    host: String,
    port: u16,
    user: String,
    password: String,
    db: String,
    pool_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 5432,
            user: String::from("postgres"),
            password: String::from("postgres"),
            db: String::from("realty_chat"),
            pool_size: 10,
        }
    }
}

impl Config {
    pub fn env() -> Option<Self> {
        let host = env::var("POSTGRES_HOST").ok();
        let port = env::var("POSTGRES_PORT")
            .unwrap_or_else(|_| "5432".to_string())
            .parse()
            .ok();

        match (host, port) {
            (Some(host), Some(port)) => {
                let d = Self::default();
                Some(Self {
                    host,
                    port,
                    user: env::var("POSTGRES_USER").unwrap_or(d.user),
                    password: env::var("POSTGRES_PASSWORD").unwrap_or(d.password),
                    db: env::var("POSTGRES_DB").unwrap_or(d.db),
                    pool_size: env::var("POSTGRES_POOL_SIZE")
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(d.pool_size),
                })
            }
            _ => {
                warn!("Postgres env is not configured, using defaults");
                None
            }
        }
    }

    pub fn new(host: impl Into<String>, port: u16, db: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            db: db.into(),
            ..Self::default()
        }
    }

    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.db
        )
    }

    pub fn connect(&self) -> super::Result<Pool> {
        let manager = ConnectionManager::<PgConnection>::new(self.url());

        let pool = r2d2::Pool::builder()
            .max_size(self.pool_size)
            .connection_timeout(Duration::from_secs(5))
            .build(manager)?;

        Ok(pool)
    }
}

/// Applies pending migrations from `migrations/`. Runs are recorded in the
/// same table the diesel CLI uses, so both can be mixed.
pub async fn migrate(pool: &Pool) -> super::Result<()> {
    let pool = pool.clone();

    tokio::task::spawn_blocking(move || -> super::Result<()> {
        let mut conn = pool.get()?;

        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| super::Error::Migration(e.to_string()))?;

        if applied.is_empty() {
            debug!("schema is up to date");
        }
        for version in applied {
            info!("migration {version} applied");
        }

        Ok(())
    })
    .await?
}
