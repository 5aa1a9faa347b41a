//! Echo client: connects, sends one payload reliable-ordered and prints the
//! echo.

use std::time::Duration;

use bytes::Bytes;
use gossamer::client::{Client, ClientConfig, ClientEvent};
use gossamer::{Channel, ResultCode};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let (code, client) = Client::connect(
        ClientConfig::new(1),
        "127.0.0.1:27110",
        |challenge| challenge,
        Duration::from_secs(5),
    )
    .await?;
    let Some(mut client) = client else {
        println!("connection refused: {code:?}");
        return Ok(());
    };
    assert_eq!(ResultCode::Success, code);
    println!("connected as client {}", client.client_id());

    client.send(
        Bytes::from_static(b"hello over gossamer"),
        Channel::RELIABLE_ORDERED,
    )?;

    loop {
        match client.event().await {
            Some(ClientEvent::Recv { payload, .. }) => {
                println!("echo: {payload:?} (ping {:?})", client.ping());
                break;
            }
            Some(ClientEvent::DisconnectedByServer { reason }) => {
                println!("server disconnected us: {reason}");
                return Ok(());
            }
            Some(ClientEvent::Disconnected) | None => {
                println!("lost the server");
                return Ok(());
            }
        }
    }

    client.disconnect().await;
    Ok(())
}
