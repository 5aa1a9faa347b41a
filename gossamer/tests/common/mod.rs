//! Helpers shared by the integration tests.
#![allow(dead_code)] // not every test binary uses every helper

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::{ready, BoxFuture};
use gossamer::auth::Authenticator;
use gossamer::info::ServerInfoProvider;
use gossamer::SessionConfig;
use gossamer_proto::codec::{Decode, Encode, ReadBytes, Result as CodecResult, WriteBytes};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

/// Session tuning with timers shrunk so tests stay fast.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        resend_budget: Duration::from_millis(100),
        keepalive_interval: Duration::from_millis(100),
        ping_interval: Duration::from_millis(100),
        ..SessionConfig::default()
    }
}

/// Challenge-based password check: the challenge is a fixed prompt, the
/// response must be the password.
pub struct PasswordAuth {
    pub password: &'static str,
}

impl Authenticator for PasswordAuth {
    fn challenge_for(&self, _client_id: u64) -> BoxFuture<'_, Bytes> {
        Box::pin(ready(Bytes::from_static(b"password?")))
    }

    fn authenticate(
        &self,
        _client_id: u64,
        _challenge: Bytes,
        response: Bytes,
    ) -> BoxFuture<'_, bool> {
        Box::pin(ready(response.as_ref() == self.password.as_bytes()))
    }
}

/// Application-defined server info blob used by the info-query test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestServerInfo {
    pub motd: String,
    pub players: u32,
}

impl Encode for TestServerInfo {
    fn encode(&self, buf: &mut impl WriteBytes) -> CodecResult<()> {
        buf.write(&self.motd)?;
        buf.write_u32(self.players)
    }
}

impl Decode for TestServerInfo {
    fn decode(buf: &mut impl ReadBytes) -> CodecResult<Self> {
        Ok(Self {
            motd: buf.read()?,
            players: buf.read_u32()?,
        })
    }
}

pub struct TestInfoProvider {
    pub info: TestServerInfo,
}

impl ServerInfoProvider for TestInfoProvider {
    fn server_info(&self) -> BoxFuture<'_, Bytes> {
        let mut buf = bytes::BytesMut::new();
        let encoded = self.info.encode(&mut buf).map(|()| buf.freeze());
        Box::pin(ready(encoded.unwrap_or_default()))
    }
}

/// Arc-wraps an authenticator.
pub fn auth(authenticator: impl Authenticator) -> Arc<dyn Authenticator> {
    Arc::new(authenticator)
}
