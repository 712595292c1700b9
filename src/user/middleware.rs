use axum::{extract::Request, middleware::Next, response::Response};
use log::debug;
use uuid::Uuid;

use super::Id;

/// Header set by the upstream authentication layer once a session is validated.
pub const PRINCIPAL_HEADER: &str = "x-principal-id";

pub async fn resolve_principal(mut req: Request, next: Next) -> crate::Result<Response> {
    let principal = req
        .headers()
        .get(PRINCIPAL_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Uuid>().ok())
        .map(Id::from)
        .ok_or(crate::Error::Unauthorized)?;

    debug!("Request authenticated as {principal}");
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
