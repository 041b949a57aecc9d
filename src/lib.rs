//! Single-decree Paxos: a group of processes agreeing on exactly one value.
//!
//! The three protocol roles are independent types:
//!
//! * `Proposer` drives rounds of PREPARE/PROMISE and ACCEPT/ACCEPTED until a
//!   quorum of acceptors accepts a value.
//! * `Acceptor` keeps the promised and accepted ballots and notifies learners
//!   of every value it accepts.
//! * `Learner` records the notifications and reports the value chosen by a
//!   quorum.
//!
//! Roles talk through a `Transport`. `LocalNetwork` delivers requests within
//! a process and can simulate message loss, while `HttpTransport` and `serve`
//! carry them over HTTP.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use synod::{Cluster, ClusterConfig};
//! # use bytes::Bytes;
//! # async fn run() {
//! let mut cluster = Cluster::local(ClusterConfig::loopback(1, 3, 2)).unwrap();
//! let decided = cluster.proposers[0].propose(Bytes::from("100")).await;
//! assert_eq!(Bytes::from("100"), decided);
//! assert_eq!(decided, cluster.learners[0].wait_chosen().await);
//! # }
//! ```
#[macro_use]
extern crate log;

mod acceptor;
mod ballot;
mod cluster;
pub mod config;
pub mod error;
mod learner;
pub mod messages;
mod proposer;
pub mod quorum;
mod retry;
pub mod transport;

pub use acceptor::{Acceptor, AcceptorState};
pub use ballot::{Ballot, NodeId};
pub use cluster::Cluster;
pub use config::{AcceptorConfig, BackoffConfig, ClusterConfig, LearnerConfig, ProposerConfig};
pub use error::{ConfigurationError, TransportError};
pub use learner::Learner;
pub use messages::Value;
pub use proposer::Proposer;
pub use transport::http::{serve, ServerHandle};
pub use transport::{HttpTransport, LocalNetwork, Receiver, Transport};
