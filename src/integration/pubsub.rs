use std::env;

use log::warn;

use crate::user;

#[derive(Clone)]
pub struct Config {
    host: String,
    port: u16,
}

impl Config {
    pub fn env() -> Option<Self> {
        let host = env::var("NATS_HOST").ok();
        let port = env::var("NATS_PORT")
            .unwrap_or_else(|_| "4222".to_string())
            .parse()
            .ok();

        if let (Some(host), Some(port)) = (host, port) {
            Some(Self { host, port })
        } else {
            warn!("NATS env is not configured, notifications disabled");
            None
        }
    }

    pub async fn connect(&self) -> super::Result<async_nats::Client> {
        let client = async_nats::connect(&format!("{}:{}", self.host, self.port)).await?;
        Ok(client)
    }
}

pub enum Subject<'a> {
    Notifications(&'a user::Id),
}

impl async_nats::subject::ToSubject for &Subject<'_> {
    fn to_subject(&self) -> async_nats::Subject {
        match self {
            Subject::Notifications(principal) => format!("noti.{principal}").into(),
        }
    }
}
