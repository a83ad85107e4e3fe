use anyhow::{Context, Result};
use tracing::info;

use signal_bridge_server::bootstrap;

/// Path to config.toml. Overridable via `CONFIG_PATH`, mirroring
/// `relay-server`'s `CONFIG_DIR` override for headless/service deployment.
fn config_path() -> String {
    std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let path = config_path();
    let app = bootstrap::setup(&path)
        .await
        .with_context(|| format!("starting up from {path}"))?;

    let listener = tokio::net::TcpListener::bind(app.bind_addr)
        .await
        .with_context(|| format!("binding {}", app.bind_addr))?;
    info!(addr = %app.bind_addr, "http surface listening");

    axum::serve(listener, app.router)
        .await
        .context("serving http surface")?;

    Ok(())
}
