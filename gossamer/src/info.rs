//! The server-info seam consumed by the stateless info query.

use bytes::Bytes;
use futures::future::BoxFuture;

/// Produces the opaque blob answered to out-of-band info requests.
///
/// The blob is application-defined; the transport never looks inside it.
/// Applications typically build it with the [`gossamer_proto::codec`] traits
/// and decode it on the client with
/// [`Client::request_server_info`](crate::client::Client::request_server_info),
/// which takes the matching [`Decode`](gossamer_proto::codec::Decode) impl.
pub trait ServerInfoProvider: Send + Sync + 'static {
    /// Serializes the current server info.
    fn server_info(&self) -> BoxFuture<'_, Bytes>;
}
