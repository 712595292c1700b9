use log::info;

use realty_chat::integration::{self, Config};
use realty_chat::state::AppState;

#[tokio::main]
async fn main() -> realty_chat::Result<()> {
    integration::init_logger()?;

    let config = Config::env()?;
    let state = AppState::init(&config).await?;

    let app = realty_chat::app(state).layer(realty_chat::cors(&config.env));
    let addr = config.env.addr();

    match config.env.ssl_config()? {
        Some(tls) => {
            info!("Listening on https://{addr}");
            axum_server::bind_openssl(addr, tls)
                .serve(app.into_make_service())
                .await
                .map_err(integration::Error::from)?;
        }
        None => {
            info!("Listening on http://{addr}");
            axum_server::bind(addr)
                .serve(app.into_make_service())
                .await
                .map_err(integration::Error::from)?;
        }
    }

    Ok(())
}
