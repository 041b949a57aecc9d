use crate::ballot::Ballot;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Value the cluster members agree upon. Opaque to the protocol.
pub type Value = Bytes;

/// `PREPARE` message is the Phase 1a message from a proposer sent
/// to acceptors to receive agreement to not accept ballots of lower value.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct PrepareRequest {
    pub proposal: Ballot,
}

/// `PROMISE` is the Phase 1b message sent from acceptors in reply to
/// `PREPARE` messages.
///
/// `prior` is the last ballot/value pair accepted by the acceptor. It is sent
/// whether or not the promise was granted, but a proposer only acts on it
/// when `promised` is set.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct PromiseResponse {
    pub acceptor: SocketAddr,
    pub proposal: Ballot,
    pub promised: bool,
    pub prior: Option<(Ballot, Value)>,
}

/// `ACCEPT` message is the Phase 2a message from a proposer sent
/// to acceptors to accept a value. The `ACCEPT` message is predicated
/// on the proposer receiving quorum from Phase 1.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct AcceptRequest {
    pub proposal: Ballot,
    pub acceptor: SocketAddr,
    pub value: Value,
}

/// `ACCEPTED` is the Phase 2b message returned to the proposer and
/// broadcast from acceptors to learners. `value` is set iff `accepted`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct AcceptedResponse {
    pub proposal: Ballot,
    pub acceptor: SocketAddr,
    pub accepted: bool,
    pub value: Option<Value>,
}

/// Requests carried by a `Transport`. The variant determines the
/// role and method being invoked on the target.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub enum Request {
    Prepare(PrepareRequest),
    Accept(AcceptRequest),
    Learn(AcceptedResponse),
}

impl Request {
    /// Name of the remote method, `Role.Method`
    pub fn method(&self) -> &'static str {
        match self {
            Request::Prepare(_) => "Acceptor.Prepare",
            Request::Accept(_) => "Acceptor.Accept",
            Request::Learn(_) => "Learner.Accepted",
        }
    }
}

/// Replies to a `Request`.
#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub enum Response {
    Promise(PromiseResponse),
    Accepted(AcceptedResponse),
    /// Acknowledgement of a one-way notification
    Ack,
}
