//! Example: Echo Client
//!
//! Connects to the echo server, sends a handful of messages and logs each
//! reply as it comes back.
//!
//! Run with: `cargo run --example echo_client`

use std::sync::Arc;
use std::time::Duration;

use framewire::config::NetworkConfig;
use framewire::protocol::echo::{self, EchoMessage};
use framewire::protocol::{MessageRegistry, WriteCloser};
use framewire::transport::{Client, ConnectionCallbacks};
use framewire::utils::logging::init_logging;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = NetworkConfig::from_env()?;
    init_logging(&config.logging)?;

    let mut builder = MessageRegistry::builder();
    echo::register(&mut builder)?;
    let registry = Arc::new(builder.build());

    let callbacks = ConnectionCallbacks::new()
        .on_error(|conn, err| warn!(net_id = conn.net_id(), error = %err, "Connection error"));
    let (handle, task) =
        Client::connect(&config.client, &config.codec, registry, callbacks).await?;

    for i in 0..5u16 {
        let msg = EchoMessage::new(2, *b"framewire-01", 0, 12289 + i, "hello, world")?;
        handle.write(Arc::new(msg))?;
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    info!("Done, closing connection");
    handle.close();
    task.await??;
    Ok(())
}
