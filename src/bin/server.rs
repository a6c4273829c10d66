//! dmsync messaging server
//!
//! Usage: `dmsync-server [settings.json]`

use anyhow::Context;
use dmsync::storage::{Settings, Storage};
use dmsync::transport::Server;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dmsync::init();

    let settings_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "dmsync.json".to_string());
    let settings = Settings::load(&settings_path)
        .with_context(|| format!("loading settings from {}", settings_path))?;

    let addr: SocketAddr = settings
        .listen_addr
        .parse()
        .with_context(|| format!("invalid listen address {}", settings.listen_addr))?;

    let store = Storage::new(&settings.database_path)
        .with_context(|| format!("opening message store at {}", settings.database_path))?;
    tracing::info!("Message store opened at {}", settings.database_path);

    let mut server = Server::new(Arc::new(Mutex::new(store)), settings);
    server.start(addr).await?;

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    tracing::info!("Shutdown requested");
    server.shutdown();

    Ok(())
}
