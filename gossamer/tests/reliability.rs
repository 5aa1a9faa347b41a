//! Delivery guarantees under packet loss.

mod common;

use std::collections::HashSet;
use std::time::Duration;

use bytes::Bytes;
use gossamer::auth::NoAuth;
use gossamer::client::{Client, ClientConfig};
use gossamer::io::{ConditionerConfig, DatagramSocket};
use gossamer::server::{Server, ServerConfig, ServerEvent};
use gossamer::{Channel, ResultCode};

use common::{auth, fast_session, init_tracing};

#[tokio::test]
async fn reliable_delivery_under_heavy_loss() {
    init_tracing();
    let lossy = ConditionerConfig {
        loss_rate: 0.4,
        delay_mean: 0.02,
        delay_std_dev: 0.0,
    };

    let server_socket = DatagramSocket::bind("127.0.0.1:0")
        .await
        .expect("server socket binds")
        .conditioned(&lossy);
    let addr = server_socket.local_addr().expect("bound");
    let config = ServerConfig {
        session: fast_session(),
        ..ServerConfig::new(1, auth(NoAuth))
    };
    let mut server = Server::start_on(config, server_socket);

    let client_socket = DatagramSocket::bind("127.0.0.1:0")
        .await
        .expect("client socket binds")
        .conditioned(&lossy);
    let (code, client) = Client::connect_on(
        ClientConfig {
            protocol_id: 1,
            session: fast_session(),
        },
        client_socket,
        addr,
        |challenge| challenge,
        Duration::from_secs(10),
    )
    .await
    .expect("connect runs");
    assert_eq!(ResultCode::Success, code);
    let client = client.expect("client handle on success");

    let sent: Vec<Bytes> = (0u32..50)
        .map(|i| Bytes::copy_from_slice(&i.to_le_bytes()))
        .collect();
    for payload in &sent {
        client
            .send(payload.clone(), Channel::RELIABLE_ORDERED)
            .expect("send queues");
    }

    let received = tokio::time::timeout(Duration::from_secs(30), async {
        let mut received = Vec::new();
        while received.len() < 50 {
            match server.event().await {
                Some(ServerEvent::Recv { payload, .. }) => received.push(payload),
                Some(_) => {}
                None => break,
            }
        }
        received
    })
    .await
    .expect("all fifty payloads arrive despite the loss");

    assert_eq!(50, received.len());
    // reliable-ordered also means they arrived exactly in send order
    assert_eq!(sent, received);
    let unique: HashSet<_> = received.iter().collect();
    assert_eq!(50, unique.len());

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn payloads_arrive_byte_identical_in_both_directions() {
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

    let c2s = Bytes::from_static(b"\x00\x01\xfe\xff client to server");
    client
        .send(c2s.clone(), Channel::RELIABLE_ORDERED)
        .expect("send queues");
    let got = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match server.event().await {
                Some(ServerEvent::Recv { payload, channel, .. }) => break (payload, channel),
                Some(_) => {}
                None => panic!("server stopped early"),
            }
        }
    })
    .await
    .expect("server receives the payload");
    assert_eq!((c2s, Channel::RELIABLE_ORDERED), got);

    let s2c = Bytes::from_static(b"server to client \xde\xad\xbe\xef");
    server
        .send_to(0, s2c.clone(), Channel::RELIABLE_UNORDERED)
        .expect("send queues");
    let got = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.event().await {
                Some(gossamer::client::ClientEvent::Recv { payload, channel }) => {
                    break (payload, channel)
                }
                Some(_) => {}
                None => panic!("client stopped early"),
            }
        }
    })
    .await
    .expect("client receives the payload");
    assert_eq!((s2c, Channel::RELIABLE_UNORDERED), got);

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn ping_settles_above_zero() {
    init_tracing();
    let config = ServerConfig {
        session: fast_session(),
        ..ServerConfig::new(1, auth(NoAuth))
    };
    let server = Server::start(config, "127.0.0.1:0")
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
    let client = client.expect("client handle on success");

    // a few ping intervals plus the server's keep-alive carrying the acks
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(client.ping() > Duration::ZERO);

    client.disconnect().await;
    server.stop().await;
}
