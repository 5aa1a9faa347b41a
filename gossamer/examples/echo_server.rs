//! Echo server: sends every payload back on the channel it arrived on.
//!
//! Run with `cargo run --example echo_server`, then connect with the
//! `echo_client` example.

use std::sync::Arc;

use gossamer::auth::NoAuth;
use gossamer::server::{Server, ServerConfig, ServerEvent};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let mut server = Server::start(ServerConfig::new(1, Arc::new(NoAuth)), "127.0.0.1:27110").await?;
    println!("listening on {}", server.local_addr()?);

    while let Some(event) = server.event().await {
        match event {
            ServerEvent::ClientConnected { client_id } => {
                println!("client {client_id} connected");
            }
            ServerEvent::Recv {
                client_id,
                payload,
                channel,
            } => {
                server.send_to(client_id, payload, channel)?;
            }
            ServerEvent::ConnectionTerminated { client_id, reason } => {
                println!("client {client_id} left: {reason}");
            }
            ServerEvent::AuthenticationFailed { addr, code } => {
                println!("{addr} failed to connect: {code:?}");
            }
        }
    }
    Ok(())
}
