use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{error, warn};
use serde::Serialize;

use crate::{conversation, integration};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("missing or invalid principal")]
    Unauthorized,

    #[error(transparent)]
    _Conversation(#[from] conversation::Error),
    #[error(transparent)]
    _Integration(#[from] integration::Error),
}

impl From<&Error> for StatusCode {
    fn from(e: &Error) -> Self {
        match e {
            Error::Unauthorized => StatusCode::UNAUTHORIZED,
            Error::_Conversation(e) => StatusCode::from(e),
            Error::_Integration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from(&self);

        let message = if status.is_server_error() {
            error!("{self:?}");
            "Internal server error".to_owned()
        } else {
            warn!("{self}");
            self.to_string()
        };

        (status, Json(ErrorResponse { message })).into_response()
    }
}

#[cfg(test)]
mod test {
    use axum::body::to_bytes;

    use crate::user;

    use super::*;

    #[test]
    fn should_map_domain_errors_to_status() {
        let cases = [
            (Error::Unauthorized, StatusCode::UNAUTHORIZED),
            (
                conversation::Error::EmptyContent.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                conversation::Error::SelfConversation.into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                conversation::Error::NotFound(conversation::Id::random()).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                conversation::Error::NotParticipant(conversation::Id::random()).into(),
                StatusCode::FORBIDDEN,
            ),
            (
                conversation::Error::_User(user::Error::NotFound(user::Id::random())).into(),
                StatusCode::NOT_FOUND,
            ),
            (
                integration::Error::MissingEnv("POSTGRES_HOST").into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (e, expected) in cases {
            assert_eq!(StatusCode::from(&e), expected, "{e}");
        }
    }

    #[test]
    fn should_hide_internal_details() {
        let res = Error::from(integration::Error::MissingEnv("POSTGRES_HOST")).into_response();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn should_report_unknown_principal_as_not_found() {
        let id = user::Id::random();
        let e = conversation::Error::from(user::Error::NotFound(id));

        let res = Error::from(e).into_response();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        let body = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(body["message"].as_str().unwrap().contains(&id.to_string()));
    }
}
