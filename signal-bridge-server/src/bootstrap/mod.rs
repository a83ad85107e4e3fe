//! Startup orchestration: config, logging, services, HTTP surface, in that
//! order (`relay-server::bootstrap::setup`'s ordering).

pub mod services;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::http::{self, AppState};

pub struct Application {
    pub router: axum::Router,
    pub bind_addr: std::net::SocketAddr,
    pub services: services::ServiceRegistry,
}

pub async fn setup(config_path: impl AsRef<std::path::Path>) -> Result<Application> {
    let config = Config::load(config_path).context("loading config.toml")?;
    crate::logging::init(&config.logging);
    info!(mode = ?config.mode, "signal bridge starting");

    let service_registry = services::setup(&config).await?;

    let app_state = AppState {
        store: service_registry.store.clone(),
        tenants: service_registry.tenants.clone(),
        dedup: service_registry.dedup.clone(),
    };
    let router = http::create_router(app_state);

    let bind_addr: std::net::SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("parsing server bind address")?;

    Ok(Application {
        router,
        bind_addr,
        services: service_registry,
    })
}
