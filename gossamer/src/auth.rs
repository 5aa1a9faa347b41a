//! The authentication seam consumed by the server.

use bytes::Bytes;
use futures::future::{ready, BoxFuture};

/// Produces and validates challenges during the connection handshake.
///
/// The server calls [`challenge_for`] when a connection request passes the
/// protocol gate, sends the returned bytes to the client, and calls
/// [`authenticate`] with the client's answer. Both calls happen before a
/// client id is assigned, so `client_id` is 0 during the handshake.
///
/// [`challenge_for`]: Authenticator::challenge_for
/// [`authenticate`]: Authenticator::authenticate
pub trait Authenticator: Send + Sync + 'static {
    /// Produces the challenge to send to a connecting client. May be empty.
    fn challenge_for(&self, client_id: u64) -> BoxFuture<'_, Bytes>;

    /// Decides whether `response` answers `challenge` correctly.
    fn authenticate(&self, client_id: u64, challenge: Bytes, response: Bytes)
        -> BoxFuture<'_, bool>;
}

/// Authenticator that accepts everyone.
///
/// The challenge is empty and any response echoing it authenticates, so the
/// handshake still traverses all four connection states - there is no
/// shortcut path for unauthenticated servers.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAuth;

impl Authenticator for NoAuth {
    fn challenge_for(&self, _client_id: u64) -> BoxFuture<'_, Bytes> {
        Box::pin(ready(Bytes::new()))
    }

    fn authenticate(
        &self,
        _client_id: u64,
        challenge: Bytes,
        response: Bytes,
    ) -> BoxFuture<'_, bool> {
        Box::pin(ready(challenge == response))
    }
}
