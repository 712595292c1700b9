use std::env;
use std::str::FromStr;
use std::{fs::File, net::SocketAddr};

use axum::http::HeaderValue;
use axum_server::tls_openssl::OpenSSLConfig;
use dotenv::dotenv;
use log::{LevelFilter, warn};
use simplelog::{ColorChoice, CombinedLogger, TermLogger, TerminalMode, WriteLogger};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};

use crate::user;

pub mod cache;
pub mod db;
pub mod pubsub;

type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("invalid value of {0}: {1}")]
    InvalidEnv(&'static str, String),
    #[error("failed to load TLS certificate: {0}")]
    Tls(String),
    #[error("migration failed: {0}")]
    Migration(String),

    #[error(transparent)]
    _Io(#[from] std::io::Error),
    #[error(transparent)]
    _Logger(#[from] log::SetLoggerError),
    #[error(transparent)]
    _R2d2(#[from] r2d2::Error),
    #[error(transparent)]
    _Redis(#[from] redis::RedisError),
    #[error(transparent)]
    _NatsConnect(#[from] async_nats::ConnectError),
    #[error(transparent)]
    _Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub enum Env {
    Local,
    Dev,
    Stage,
    Production,
}

impl Env {
    pub fn addr(&self) -> SocketAddr {
        match self {
            Env::Local => SocketAddr::from(([127, 0, 0, 1], 8000)),
            Env::Dev | Env::Stage => SocketAddr::from(([0, 0, 0, 0], 8000)),
            Env::Production => SocketAddr::from(([0, 0, 0, 0], 8443)),
        }
    }

    pub fn ssl_config(&self) -> Result<Option<OpenSSLConfig>> {
        match self {
            Env::Local | Env::Dev | Env::Stage => Ok(None),
            Env::Production => {
                let cert =
                    env::var("SSL_CERT_FILE").map_err(|_| Error::MissingEnv("SSL_CERT_FILE"))?;
                let key =
                    env::var("SSL_KEY_FILE").map_err(|_| Error::MissingEnv("SSL_KEY_FILE"))?;
                load_tls(&cert, &key).map(Some)
            }
        }
    }

    pub fn allow_origin(&self) -> AllowOrigin {
        match self {
            Env::Local | Env::Dev => AllowOrigin::any(),
            Env::Stage | Env::Production => {
                let origins = env::var("ALLOW_ORIGIN")
                    .unwrap_or_default()
                    .split(',')
                    .filter_map(|o| match HeaderValue::from_str(o.trim()) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!("skipping invalid ALLOW_ORIGIN value {o:?}: {e}");
                            None
                        }
                    })
                    .collect::<Vec<HeaderValue>>();
                AllowOrigin::list(origins)
            }
        }
    }

    pub fn allow_methods(&self) -> AllowMethods {
        AllowMethods::any()
    }

    pub fn allow_headers(&self) -> AllowHeaders {
        AllowHeaders::any()
    }
}

fn load_tls(cert: &str, key: &str) -> Result<OpenSSLConfig> {
    OpenSSLConfig::from_pem_file(cert, key)
        .map_err(|e| Error::Tls(format!("{cert}, {key}: {e}")))
}

impl FromStr for Env {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "local" => Ok(Env::Local),
            "dev" => Ok(Env::Dev),
            "stg" => Ok(Env::Stage),
            "prod" => Ok(Env::Production),
            other => Err(Error::InvalidEnv("ENV", other.to_string())),
        }
    }
}

/// Where conversations and principals are persisted.
#[derive(Clone)]
pub enum Storage {
    Postgres(db::Config),
    Memory { principals: Vec<user::Id> },
}

#[derive(Clone)]
pub struct Config {
    pub env: Env,

    pub storage: Storage,
    pub redis: Option<cache::Config>,
    pub pubsub: Option<pubsub::Config>,
}

impl Config {
    pub fn env() -> Result<Self> {
        dotenv().ok();

        let env = match env::var("ENV") {
            Ok(e) => e.parse()?,
            Err(_) => Env::Local,
        };

        let storage = match env::var("STORAGE").as_deref() {
            Ok("memory") => Storage::Memory {
                principals: seed_principals()?,
            },
            Ok("postgres") | Err(_) => Storage::Postgres(db::Config::env().unwrap_or_default()),
            Ok(other) => return Err(Error::InvalidEnv("STORAGE", other.to_string())),
        };

        Ok(Self {
            env,
            storage,
            redis: cache::Config::env(),
            pubsub: pubsub::Config::env(),
        })
    }
}

fn seed_principals() -> Result<Vec<user::Id>> {
    let raw = env::var("SEED_PRINCIPALS").unwrap_or_default();

    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<uuid::Uuid>()
                .map(user::Id::from)
                .map_err(|_| Error::InvalidEnv("SEED_PRINCIPALS", s.to_string()))
        })
        .collect()
}

pub fn init_logger() -> Result<()> {
    dotenv().ok();

    let rust_log = env::var("RUST_LOG").unwrap_or("info".into());
    let level = LevelFilter::from_str(&rust_log).unwrap_or(LevelFilter::Info);
    let log_file = env::var("SERVICE_NAME")
        .map(|pkg| format!("{pkg}.log"))
        .unwrap_or("service.log".into());

    CombinedLogger::init(vec![
        TermLogger::new(
            level,
            simplelog::Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        WriteLogger::new(level, simplelog::Config::default(), File::create(log_file)?),
    ])?;

    Ok(())
}
