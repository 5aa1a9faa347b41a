//! Termination scenarios.

mod common;

use std::time::Duration;

use gossamer::auth::NoAuth;
use gossamer::client::{Client, ClientConfig, ClientEvent};
use gossamer::server::{Server, ServerConfig, ServerEvent};
use gossamer::ResultCode;

use common::{auth, fast_session, init_tracing};

#[tokio::test]
async fn server_triggered_disconnect_reaches_the_client() {
    init_tracing();
    let config = ServerConfig {
        session: fast_session(),
        ..ServerConfig::new(1, auth(NoAuth))
    };
    let mut server = Server::start(config, "127.0.0.1:0")
        .await
        .expect("server starts");
    let addr = server.local_addr().expect("bound");

    let (code, client) = Client::connect(
        ClientConfig {
            protocol_id: 1,
            session: fast_session(),
        },
        addr,
        |challenge| challenge,
        Duration::from_secs(2),
    )
    .await
    .expect("connect runs");
    assert_eq!(ResultCode::Success, code);
    let mut client = client.expect("client handle on success");

    server
        .disconnect_client(0, "kicked")
        .expect("client 0 is connected");
    // the peer record is gone on the server side
    assert!(server.connection(0).is_none());

    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            match client.event().await {
                Some(ClientEvent::DisconnectedByServer { reason }) => break Some(reason),
                Some(_) => continue,
                None => break None,
            }
        }
    })
    .await
    .expect("client learns of the disconnect within a second");
    assert_eq!(Some("kicked".to_owned()), event);

    let mut saw_terminated = false;
    while let Some(event) = server.try_event() {
        if let ServerEvent::ConnectionTerminated { client_id, reason } = event {
            assert_eq!(0, client_id);
            assert_eq!("kicked", reason);
            saw_terminated = true;
        }
    }
    assert!(saw_terminated);

    server.stop().await;
}
