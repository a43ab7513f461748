use anyhow::Result;
use outlivion_api::{AppState, config::Config, init_pool, init_router};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    let pool = init_pool(&config.database_url).await?;
    sqlx::migrate!().run(&pool).await?;

    let port = config.server_port;
    let state = AppState {
        pool,
        config,
        http: reqwest::Client::new(),
    };

    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on 0.0.0.0:{}", port);
    axum::serve(listener, init_router(state)).await?;
    Ok(())
}
