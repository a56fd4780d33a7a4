//! Many clients sharing one server and one frozen registry

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use framewire::config::{ClientConfig, CodecConfig, ServerConfig};
use framewire::error::ProtocolError;
use framewire::protocol::echo::{self, EchoMessage, ECHO_MESSAGE_NUMBER};
use framewire::protocol::{MessageRegistry, WriteCloser};
use framewire::transport::{Client, ConnectionCallbacks, Server};

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_clients_get_their_own_replies() {
    let clients = 16usize;
    let per_client = 50usize;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();

    let mut server_registry = MessageRegistry::builder();
    echo::register(&mut server_registry).unwrap();
    let server = Server::new(
        ServerConfig {
            address: addr.clone(),
            shutdown_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        },
        &CodecConfig::default(),
        Arc::new(server_registry.build()),
    );
    let token = shutdown.clone();
    let server_task = tokio::spawn(async move { server.start(listener, token).await });

    let mut tasks = JoinSet::new();
    for client_id in 0..clients {
        let addr = addr.clone();
        tasks.spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<u16>();
            let mut builder = MessageRegistry::builder();
            builder
                .register(
                    ECHO_MESSAGE_NUMBER,
                    echo::deserialize_message,
                    move |ctx, _conn| {
                        let reply = ctx.message_as::<EchoMessage>()?;
                        tx.send(reply.header.command)
                            .map_err(|_| ProtocolError::ConnectionClosed)
                    },
                    echo::message_type_handler,
                    echo::message_head_handler,
                )
                .unwrap();

            let config = ClientConfig {
                address: addr,
                net_id: client_id as i64,
                write_queue_limit: per_client,
                ..ClientConfig::default()
            };
            let (handle, task) = Client::connect(
                &config,
                &CodecConfig::default(),
                Arc::new(builder.build()),
                ConnectionCallbacks::default(),
            )
            .await
            .unwrap();

            let mut session = [0u8; 12];
            session[0] = client_id as u8;
            for i in 0..per_client {
                let msg = EchoMessage::new(1, session, 0, i as u16, vec![client_id as u8; i]).unwrap();
                handle.write(Arc::new(msg)).unwrap();
            }

            // Replies on one connection come back in the order they were sent
            for i in 0..per_client {
                let command = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                    .await
                    .unwrap()
                    .unwrap();
                assert_eq!(command, i as u16);
            }

            handle.close();
            task.await.unwrap().unwrap();
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }

    shutdown.cancel();
    server_task.await.unwrap().unwrap();
}
