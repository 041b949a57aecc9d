use crate::ballot::NodeId;
use std::net::SocketAddr;
use thiserror::Error;

/// Rejected configuration, detected before any round runs.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("no acceptors configured")]
    NoAcceptors,

    #[error("acceptor {} configured more than once", .0)]
    DuplicateAcceptor(SocketAddr),

    #[error("learner {} configured more than once", .0)]
    DuplicateLearner(SocketAddr),

    #[error("address {} assigned to more than one role", .0)]
    SharedAddress(SocketAddr),

    #[error("proposer identity {} assigned more than once", .0)]
    DuplicateIdentity(NodeId),

    #[error("round timeout must be non-zero")]
    ZeroRoundTimeout,

    #[error("initial backoff must be non-zero when the backoff cap is")]
    ZeroInitialBackoff,
}

/// Failure to deliver a request or obtain its response. The protocol
/// treats every variant the same way as a negative reply.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no route to {}", .0)]
    Unreachable(SocketAddr),

    #[error("request to {} dropped", .0)]
    Dropped(SocketAddr),

    #[error("{} does not serve {}", .0, .1)]
    Unroutable(SocketAddr, &'static str),

    #[error("unexpected HTTP status {}", .0)]
    Status(hyper::StatusCode),

    #[error("http error: {}", .0)]
    Http(#[from] hyper::Error),

    #[error("invalid request: {}", .0)]
    Request(#[from] hyper::http::Error),

    #[error("codec error: {}", .0)]
    Codec(#[from] bincode::Error),

    #[error("io error: {}", .0)]
    Io(#[from] std::io::Error),
}
