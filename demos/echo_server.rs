//! Example: Echo Server
//!
//! Accepts connections and writes every echo message straight back.
//!
//! Run with: `cargo run --example echo_server`
//! Settings come from `FRAMEWIRE_*` environment variables, e.g.
//! `FRAMEWIRE_SERVER_ADDRESS=0.0.0.0:12345`.

use std::sync::Arc;
use std::time::Duration;

use framewire::config::NetworkConfig;
use framewire::protocol::{echo, MessageRegistry, WriteCloser};
use framewire::transport::{ConnectionCallbacks, Server};
use framewire::utils::logging::init_logging;
use framewire::utils::metrics::{global_metrics, init_metrics};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    config.validate_strict()?;
    init_logging(&config.logging)?;
    init_metrics();

    let mut builder = MessageRegistry::builder();
    echo::register(&mut builder)?;
    let registry = Arc::new(builder.build());

    let callbacks = ConnectionCallbacks::new()
        .on_connect(|conn| {
            info!(net_id = conn.net_id(), peer = %conn.peer(), "Client connected");
            true
        })
        .on_close(|conn| info!(net_id = conn.net_id(), "Client disconnected"));

    let server =
        Server::new(config.server.clone(), &config.codec, registry).with_callbacks(callbacks);
    let listener = server.bind().await?;

    tokio::spawn(async {
        let mut ticker = tokio::time::interval(Duration::from_secs(30));
        loop {
            ticker.tick().await;
            global_metrics().log_metrics();
        }
    });

    server.run(listener).await?;
    global_metrics().log_metrics();
    Ok(())
}
