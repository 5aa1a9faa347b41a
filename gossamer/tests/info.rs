//! Out-of-band server info queries.

mod common;

use std::sync::Arc;
use std::time::Duration;

use gossamer::auth::NoAuth;
use gossamer::client::Client;
use gossamer::server::{Server, ServerConfig};

use common::{auth, init_tracing, TestInfoProvider, TestServerInfo};

#[tokio::test]
async fn info_query_round_trips_without_connecting() {
    init_tracing();
    let info = TestServerInfo {
        motd: "welcome to the test server".to_owned(),
        players: 17,
    };
    let config = ServerConfig {
        info_provider: Some(Arc::new(TestInfoProvider { info: info.clone() })),
        ..ServerConfig::new(9, auth(NoAuth))
    };
    let server = Server::start(config, "127.0.0.1:0")
        .await
        .expect("server starts");
    let addr = server.local_addr().expect("bound");

    let got: Option<TestServerInfo> =
        Client::request_server_info(addr, Duration::from_secs(2))
            .await
            .expect("query runs");
    assert_eq!(Some(info), got);

    // the query never created a peer record
    assert!(server.connections().is_empty());
    server.stop().await;
}

#[tokio::test]
async fn info_query_times_out_quietly_without_a_provider() {
    init_tracing();
    let server = Server::start(ServerConfig::new(9, auth(NoAuth)), "127.0.0.1:0")
        .await
        .expect("server starts");
    let addr = server.local_addr().expect("bound");

    let got: Option<TestServerInfo> =
        Client::request_server_info(addr, Duration::from_millis(500))
            .await
            .expect("query runs");
    assert_eq!(None, got);
    server.stop().await;
}
