mod allocator;
mod auth;
mod cli;
mod connection_manager;
mod db;
mod error;
mod http;
mod models;
mod routes;
mod ws_session;

use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;

use auth::JwtSecret;
use connection_manager::ConnectionManager;

#[derive(Clone)]
pub struct AppState {
    pool: PgPool,
    connections: Arc<ConnectionManager>,
    jwt_secret: JwtSecret,
}

impl axum::extract::FromRef<AppState> for JwtSecret {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_secret.clone()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    let _log_handle = rvpn_logging::init(&cli.log_filter)?;

    let pool = db::connect(&cli.database_url).await?;
    let state = AppState {
        pool,
        connections: Arc::new(ConnectionManager::new()),
        jwt_secret: JwtSecret(cli.jwt_secret),
    };

    let router = http::router(state);
    let listener = tokio::net::TcpListener::bind(cli.bind_addr).await?;
    tracing::info!(addr = %cli.bind_addr, "control plane listening");
    axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>()).await?;
    Ok(())
}
