#![forbid(unsafe_code)]

pub mod config;
pub mod relay;
pub mod server;

use tokio::net::TcpListener;
use tracing::info;

pub use config::{Config, ConfigError};
pub use server::{AppState, build_router};

pub fn build_state(config: Config) -> AppState {
    AppState::from_config(config)
}

pub fn build_app(state: AppState) -> axum::Router {
    server::build_router(state)
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let state = build_state(config);
    let app = build_app(state.clone());
    let listener = TcpListener::bind(state.config.bind_addr).await?;
    info!(
        service = %state.config.service_name,
        bind_addr = %state.config.bind_addr,
        "assistant service listening",
    );
    axum::serve(listener, app).await?;
    Ok(())
}
