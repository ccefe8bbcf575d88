#![forbid(unsafe_code)]

pub mod config;
pub mod db;
pub mod server;
pub mod tasks;

use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

pub use config::{Config, ConfigError};
pub use server::{AppState, build_router};

use crate::db::ApiDb;

pub async fn build_state(config: Config) -> Result<AppState> {
    let tasks = match config.db_url.clone() {
        Some(url) => {
            let db = Arc::new(ApiDb::connect(url.as_str()).await?);
            tasks::postgres(db)
        }
        None => {
            info!(
                target: "skiff.api",
                "no database url configured; using in-memory task store",
            );
            tasks::memory()
        }
    };
    Ok(AppState::new(config, tasks))
}

pub async fn build_app(config: Config) -> Result<axum::Router> {
    Ok(build_router(build_state(config).await?))
}

pub async fn serve(config: Config) -> Result<()> {
    let listener = TcpListener::bind(config.bind_addr).await?;
    info!(
        service = %config.service_name,
        bind_addr = %config.bind_addr,
        "api service listening"
    );
    axum::serve(listener, build_app(config).await?).await?;
    Ok(())
}
