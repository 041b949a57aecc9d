use crate::ballot::Ballot;
use crate::config::LearnerConfig;
use crate::error::ConfigurationError;
use crate::messages::*;
use crate::quorum::QuorumSet;
use crate::transport::Receiver;
use futures_util::future::BoxFuture;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use tokio::sync::{watch, Mutex};

/// Tracking of the proposal within the learner state machine
#[derive(Debug)]
struct ProposalStatus {
    /// Set of acceptors that have sent ACCEPTED for this ballot
    acceptors: QuorumSet<SocketAddr>,
    /// Value accepted under the ballot (all acceptors send the
    /// same value for a given ballot)
    value: Value,
}

/// State machine for the learner
#[derive(Debug)]
enum LearnerState {
    /// The learner is waiting for ACCEPTED messages from the acceptors to
    /// meet quorum
    AwaitQuorum {
        /// maps ballots to status (for quorum tracking). acceptors may
        /// send ACCEPTED for different ballots, so we wait for a single
        /// ballot to reach quorum
        proposals: HashMap<Ballot, ProposalStatus>,
        /// last ballot each acceptor reported, older ones are superseded
        acceptors: HashMap<SocketAddr, Ballot>,
    },
    /// A final value has been chosen by a quorum of acceptors
    Final { accepted: Ballot, value: Value },
}

impl LearnerState {
    fn new() -> LearnerState {
        LearnerState::AwaitQuorum {
            proposals: HashMap::new(),
            acceptors: HashMap::new(),
        }
    }
}

struct Inner {
    /// Most recent ACCEPTED notification, with no quorum check
    last_accepted: Option<(Ballot, Value)>,
    state: LearnerState,
    /// Acceptors allowed to count towards quorum
    members: HashSet<SocketAddr>,
    quorum: usize,
}

impl Inner {
    /// Handles ACCEPTED messages from acceptors. Returns the ballot and value
    /// when this message completes a quorum.
    fn receive_accepted(&mut self, accepted: AcceptedResponse) -> Option<(Ballot, Value)> {
        let AcceptedResponse {
            proposal,
            acceptor: peer,
            accepted,
            value,
        } = accepted;

        if !accepted {
            trace!("Ignoring rejected {} from {}", proposal, peer);
            return None;
        }
        let value = match value {
            Some(value) => value,
            None => {
                warn!("ACCEPTED {} from {} is missing its value", proposal, peer);
                return None;
            }
        };

        self.last_accepted = Some((proposal, value.clone()));

        if !self.members.contains(&peer) {
            warn!("Ignoring {} from unknown acceptor {}", proposal, peer);
            return None;
        }

        let quorum = self.quorum;
        let chosen = match self.state {
            LearnerState::AwaitQuorum {
                ref mut proposals,
                ref mut acceptors,
            } => {
                match acceptors.entry(peer) {
                    Entry::Occupied(mut e) => {
                        // if this is an older ballot, discard it
                        if *e.get() > proposal {
                            trace!("Ignoring outdated {} from {}", proposal, peer);
                            return None;
                        }

                        if *e.get() < proposal {
                            let prev = e.insert(proposal);
                            // drop the acceptor's vote for the superseded ballot
                            if let Entry::Occupied(mut e) = proposals.entry(prev) {
                                e.get_mut().acceptors.remove(&peer);
                                if e.get().acceptors.is_empty() {
                                    e.remove();
                                }
                            }
                        }
                    }
                    Entry::Vacant(e) => {
                        e.insert(proposal);
                    }
                }

                let status = proposals.entry(proposal).or_insert_with(|| ProposalStatus {
                    acceptors: QuorumSet::with_size(quorum),
                    value: value.clone(),
                });
                if status.value != value {
                    warn!(
                        "Acceptor {} reported a different value for {}",
                        peer, proposal
                    );
                    return None;
                }

                debug!("Accepted {} for peer={}", proposal, peer);
                status.acceptors.insert(peer);
                if !status.acceptors.has_quorum() {
                    return None;
                }
                status.value.clone()
            }
            LearnerState::Final {
                accepted,
                value: ref chosen,
            } => {
                if *chosen != value {
                    warn!(
                        "Ignoring {} from {}: value already chosen with {}",
                        proposal, peer, accepted
                    );
                }
                return None;
            }
        };

        info!("Quorum reached for {}", proposal);
        self.state = LearnerState::Final {
            accepted: proposal,
            value: chosen.clone(),
        };
        Some((proposal, chosen))
    }
}

/// A Paxos learner listens for ACCEPTED notifications from acceptors.
///
/// Two views are kept. `last_accepted` records every notification as it
/// arrives; a single acceptor accepting a value is enough to change it.
/// `chosen` is only set once a quorum of acceptors report the same ballot,
/// and never changes afterwards.
pub struct Learner {
    address: SocketAddr,
    inner: Mutex<Inner>,
    chosen: watch::Sender<Option<Value>>,
}

impl Learner {
    pub fn new(config: LearnerConfig) -> Result<Learner, ConfigurationError> {
        config.validate()?;
        let (chosen, _) = watch::channel(None);
        Ok(Learner {
            address: config.address,
            inner: Mutex::new(Inner {
                last_accepted: None,
                state: LearnerState::new(),
                quorum: config.quorum_size(),
                members: config.acceptors.into_iter().collect(),
            }),
            chosen,
        })
    }

    /// Address this learner answers on
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Records an ACCEPTED notification.
    pub async fn receive_accepted(&self, accepted: AcceptedResponse) {
        let resolution = self.inner.lock().await.receive_accepted(accepted);
        if let Some((_, value)) = resolution {
            self.chosen.send_replace(Some(value));
        }
    }

    /// Last value reported accepted by any acceptor
    pub async fn last_accepted(&self) -> Option<(Ballot, Value)> {
        self.inner.lock().await.last_accepted.clone()
    }

    /// Value accepted by a quorum of acceptors, if any
    pub fn chosen(&self) -> Option<Value> {
        self.chosen.borrow().clone()
    }

    /// Waits until a value is accepted by a quorum of acceptors.
    pub async fn wait_chosen(&self) -> Value {
        let mut rx = self.chosen.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(value) = current {
                return value;
            }
            // the sender lives as long as `self`
            let _ = rx.changed().await;
        }
    }

    /// Forgets everything learned, starting a new consensus instance.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.last_accepted = None;
        inner.state = LearnerState::new();
        self.chosen.send_replace(None);
    }
}

impl Receiver for Learner {
    fn receive(&self, request: Request) -> BoxFuture<'_, Option<Response>> {
        Box::pin(async move {
            match request {
                Request::Learn(accepted) => {
                    self.receive_accepted(accepted).await;
                    Some(Response::Ack)
                }
                _ => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use lazy_static::lazy_static;

    lazy_static! {
        static ref ACCEPTORS: Vec<SocketAddr> = vec![
            "127.0.0.1:4101".parse().unwrap(),
            "127.0.0.1:4102".parse().unwrap(),
            "127.0.0.1:4103".parse().unwrap(),
        ];
        static ref ME: SocketAddr = "127.0.0.1:4201".parse().unwrap();
    }

    fn accepted(acceptor: usize, proposal: Ballot, value: &'static str) -> AcceptedResponse {
        AcceptedResponse {
            proposal,
            acceptor: ACCEPTORS[acceptor],
            accepted: true,
            value: Some(Bytes::from(value)),
        }
    }

    fn learner() -> Learner {
        Learner::new(LearnerConfig::new(*ME, ACCEPTORS.iter().cloned())).unwrap()
    }

    #[tokio::test]
    async fn chosen_after_quorum() {
        let learner = learner();

        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        assert_eq!(None, learner.chosen());
        assert_eq!(
            Some((Ballot(1, 1), Bytes::from("100"))),
            learner.last_accepted().await
        );

        // duplicates from one acceptor do not count twice
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        assert_eq!(None, learner.chosen());

        learner.receive_accepted(accepted(2, Ballot(1, 1), "100")).await;
        assert_eq!(Some(Bytes::from("100")), learner.chosen());
        assert_eq!(Bytes::from("100"), learner.wait_chosen().await);
    }

    #[tokio::test]
    async fn rejected_notifications_are_ignored() {
        let learner = learner();
        let mut msg = accepted(0, Ballot(1, 1), "100");
        msg.accepted = false;
        msg.value = None;
        learner.receive_accepted(msg).await;
        assert_eq!(None, learner.last_accepted().await);
    }

    #[tokio::test]
    async fn last_accepted_is_overwritten() {
        let learner = learner();
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        learner.receive_accepted(accepted(1, Ballot(1, 2), "101")).await;
        assert_eq!(
            Some((Ballot(1, 2), Bytes::from("101"))),
            learner.last_accepted().await
        );
        assert_eq!(None, learner.chosen());
    }

    #[tokio::test]
    async fn superseded_ballots_lose_votes() {
        let learner = learner();
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        // acceptor 0 moves on to a newer ballot
        learner.receive_accepted(accepted(0, Ballot(2, 2), "100")).await;
        // an old ballot from acceptor 0 is discarded
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;

        learner.receive_accepted(accepted(1, Ballot(1, 1), "100")).await;
        assert_eq!(None, learner.chosen());

        learner.receive_accepted(accepted(1, Ballot(2, 2), "100")).await;
        assert_eq!(Some(Bytes::from("100")), learner.chosen());
    }

    #[tokio::test]
    async fn unknown_acceptors_do_not_count() {
        let learner = learner();
        let stranger: SocketAddr = "127.0.0.1:4199".parse().unwrap();
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;

        let mut msg = accepted(0, Ballot(1, 1), "100");
        msg.acceptor = stranger;
        learner.receive_accepted(msg.clone()).await;
        msg.acceptor = *ME;
        learner.receive_accepted(msg).await;
        assert_eq!(None, learner.chosen());

        learner.receive_accepted(accepted(1, Ballot(1, 1), "100")).await;
        assert_eq!(Some(Bytes::from("100")), learner.chosen());
    }

    #[tokio::test]
    async fn chosen_value_is_final() {
        let learner = learner();
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        learner.receive_accepted(accepted(1, Ballot(1, 1), "100")).await;

        learner.receive_accepted(accepted(2, Ballot(5, 3), "300")).await;
        learner.receive_accepted(accepted(0, Ballot(5, 3), "300")).await;
        assert_eq!(Some(Bytes::from("100")), learner.chosen());
        assert_eq!(
            Some((Ballot(5, 3), Bytes::from("300"))),
            learner.last_accepted().await
        );
    }

    #[tokio::test]
    async fn reset_clears_both_views() {
        let learner = learner();
        learner.receive_accepted(accepted(0, Ballot(1, 1), "100")).await;
        learner.receive_accepted(accepted(1, Ballot(1, 1), "100")).await;
        learner.reset().await;

        assert_eq!(None, learner.chosen());
        assert_eq!(None, learner.last_accepted().await);

        learner.receive_accepted(accepted(0, Ballot(1, 1), "200")).await;
        learner.receive_accepted(accepted(1, Ballot(1, 1), "200")).await;
        assert_eq!(Some(Bytes::from("200")), learner.chosen());
    }

    #[tokio::test]
    async fn serves_learn_requests_only() {
        let learner = learner();
        let response = learner
            .receive(Request::Learn(accepted(0, Ballot(1, 1), "100")))
            .await;
        assert_eq!(Some(Response::Ack), response);

        let response = learner
            .receive(Request::Prepare(PrepareRequest { proposal: Ballot(1, 1) }))
            .await;
        assert_eq!(None, response);
    }
}
