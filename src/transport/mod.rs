//! Request/response plumbing between roles.
//!
//! The protocol only needs to send a request to an address and await a single
//! reply, with any delivery failure reported as an error. `Transport` is the
//! client side of that contract and `Receiver` is the server side implemented
//! by each role.
pub mod http;
pub mod local;

use crate::error::TransportError;
use crate::messages::{Request, Response};
use futures_util::future::BoxFuture;
use std::net::SocketAddr;

pub use self::http::HttpTransport;
pub use self::local::LocalNetwork;

/// Client side of the request/response transport.
pub trait Transport: Clone + Send + Sync + 'static {
    /// Sends `request` to the role at `target` and resolves with its reply.
    fn invoke(
        &self,
        target: SocketAddr,
        request: Request,
    ) -> BoxFuture<'static, Result<Response, TransportError>>;
}

/// Server side of a role: answers requests delivered by a transport.
pub trait Receiver: Send + Sync {
    /// Handles a request. `None` is returned when the role does not serve it.
    fn receive(&self, request: Request) -> BoxFuture<'_, Option<Response>>;
}
