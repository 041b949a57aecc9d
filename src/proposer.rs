use crate::ballot::{Ballot, NodeId};
use crate::config::ProposerConfig;
use crate::error::{ConfigurationError, TransportError};
use crate::messages::*;
use crate::quorum::QuorumSet;
use crate::retry::Backoff;
use crate::transport::Transport;
use std::cmp::max;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::timeout;

/// Encoding of the Proposer role's state machine
#[derive(Clone, Debug, PartialEq, Eq)]
enum ProposerState {
    /// No round in flight
    Idle,
    /// PREPARE sent, waiting on a quorum of PROMISE
    Preparing { proposal: Ballot },
    /// Phase 1 quorum reached, ACCEPT sent with `value`
    Accepting { proposal: Ballot, value: Value },
    /// A quorum accepted `value`. Terminal until `reset`.
    Decided { proposal: Ballot, value: Value },
}

/// How a single phase of a round ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    /// Quorum of positive replies
    Quorum,
    /// Quorum of negative replies or failures
    Rejected,
    /// Every acceptor replied without either side reaching quorum
    Split,
    /// The round timeout elapsed first
    TimedOut,
}

/// Counts distinct acceptors on each side of a phase.
struct Tally {
    grants: QuorumSet<SocketAddr>,
    denials: QuorumSet<SocketAddr>,
}

impl Tally {
    fn new(acceptors: usize) -> Tally {
        Tally {
            grants: QuorumSet::majority_of(acceptors),
            denials: QuorumSet::majority_of(acceptors),
        }
    }

    fn record(&mut self, acceptor: SocketAddr, granted: bool) -> Option<Outcome> {
        if granted {
            self.grants.insert(acceptor);
            if self.grants.has_quorum() {
                return Some(Outcome::Quorum);
            }
        } else {
            self.denials.insert(acceptor);
            if self.denials.has_quorum() {
                return Some(Outcome::Rejected);
            }
        }
        None
    }
}

type Replies = mpsc::UnboundedReceiver<(SocketAddr, Result<Response, TransportError>)>;

/// The proposer drives a single consensus instance to a decision. Each round
/// runs Phase 1 (PREPARE/PROMISE) and, on a quorum of promises, Phase 2
/// (ACCEPT/ACCEPTED) against every acceptor. A round that fails to reach
/// quorum before the round timeout is abandoned and retried with a higher
/// ballot.
///
/// If any promising acceptor has already accepted a value, the value with the
/// highest ballot is proposed in Phase 2 instead of the caller's value.
pub struct Proposer<T> {
    config: ProposerConfig,
    transport: T,
    state: ProposerState,
    /// Highest ballot produced or observed thus far
    highest: Option<Ballot>,
    /// Highest accepted ballot/value reported by a promising acceptor
    adopted: Option<(Ballot, Value)>,
    /// PREPARE replies still outstanding when their phase ended
    late_promises: Vec<(Ballot, Replies)>,
    backoff: Backoff,
}

impl<T: Transport> Proposer<T> {
    pub fn new(config: ProposerConfig, transport: T) -> Result<Proposer<T>, ConfigurationError> {
        config.validate()?;
        let backoff = Backoff::new(config.backoff);
        Ok(Proposer {
            config,
            transport,
            state: ProposerState::Idle,
            highest: None,
            adopted: None,
            late_promises: Vec::new(),
            backoff,
        })
    }

    pub fn identity(&self) -> NodeId {
        self.config.identity
    }

    /// Decided value, once a round has reached an accept quorum
    pub fn decided(&self) -> Option<&Value> {
        match self.state {
            ProposerState::Decided { ref value, .. } => Some(value),
            _ => None,
        }
    }

    /// Ballot of the decision, once decided
    pub fn decided_ballot(&self) -> Option<Ballot> {
        match self.state {
            ProposerState::Decided { proposal, .. } => Some(proposal),
            _ => None,
        }
    }

    /// Ballot of an unfinished round. A round is left unfinished when the
    /// `propose` future is dropped before it completes.
    pub fn in_flight_ballot(&self) -> Option<Ballot> {
        match self.state {
            ProposerState::Preparing { proposal }
            | ProposerState::Accepting { proposal, .. } => Some(proposal),
            _ => None,
        }
    }

    /// Value sent with ACCEPT in the latest round that reached Phase 2
    pub fn proposed_value(&self) -> Option<&Value> {
        match self.state {
            ProposerState::Accepting { ref value, .. }
            | ProposerState::Decided { ref value, .. } => Some(value),
            _ => None,
        }
    }

    /// Highest ballot the proposer has produced or observed
    pub fn highest_observed_ballot(&self) -> Option<Ballot> {
        self.highest
    }

    /// Previously accepted value the proposer is bound to propose
    pub fn adopted(&self) -> Option<&(Ballot, Value)> {
        self.adopted.as_ref()
    }

    /// Clears all proposer state, starting a new consensus instance.
    pub fn reset(&mut self) {
        self.state = ProposerState::Idle;
        self.highest = None;
        self.adopted = None;
        self.late_promises.clear();
        self.backoff.reset();
    }

    /// Runs rounds until a value is decided and returns it. The value may
    /// differ from `value` when an acceptor had already accepted another one.
    ///
    /// There is no overall deadline; callers wanting one should wrap the
    /// future in a timeout.
    pub async fn propose(&mut self, value: Value) -> Value {
        if let ProposerState::Decided { ref value, .. } = self.state {
            return value.clone();
        }

        self.backoff.reset();
        loop {
            if let Some(decided) = self.run_round(&value).await {
                return decided;
            }

            let wait = self.backoff.next_wait();
            trace!(
                "[proposer:{}] retrying in {:?}",
                self.config.identity,
                wait
            );
            if wait > Duration::from_millis(0) {
                tokio::time::sleep(wait).await;
            }
        }
    }

    /// Applies PROMISE replies that arrived after their phase ended. A late
    /// promise may carry a higher prior accepted value than those counted.
    fn drain_late_promises(&mut self) {
        let identity = self.config.identity;
        let adopted = &mut self.adopted;
        let highest = &mut self.highest;
        self.late_promises.retain_mut(|(proposal, replies)| loop {
            match replies.try_recv() {
                Ok((acceptor, reply)) => {
                    receive_promise(identity, *proposal, acceptor, reply, adopted, highest);
                }
                Err(TryRecvError::Empty) => break true,
                Err(TryRecvError::Disconnected) => break false,
            }
        });
    }

    /// Generates the next ballot and enters the preparing state.
    fn prepare(&mut self) -> Ballot {
        self.drain_late_promises();
        let proposal = Ballot::next(self.highest, self.config.identity);
        self.highest = Some(proposal);
        self.state = ProposerState::Preparing { proposal };
        proposal
    }

    async fn run_round(&mut self, value: &Value) -> Option<Value> {
        let proposal = self.prepare();
        debug!(
            "[proposer:{}] phase 1 with {}",
            self.config.identity, proposal
        );

        let outcome = self.run_prepare(proposal).await;
        if outcome != Outcome::Quorum {
            debug!(
                "[proposer:{}] phase 1 for {} ended with {:?}",
                self.config.identity, proposal, outcome
            );
            self.state = ProposerState::Idle;
            return None;
        }

        self.drain_late_promises();
        let value = match self.adopted {
            Some((_, ref adopted)) => adopted.clone(),
            None => value.clone(),
        };
        self.state = ProposerState::Accepting {
            proposal,
            value: value.clone(),
        };
        debug!(
            "[proposer:{}] phase 2 with {}",
            self.config.identity, proposal
        );

        let outcome = self.run_accept(proposal, &value).await;
        if outcome != Outcome::Quorum {
            debug!(
                "[proposer:{}] phase 2 for {} ended with {:?}",
                self.config.identity, proposal, outcome
            );
            self.state = ProposerState::Idle;
            return None;
        }

        info!(
            "[proposer:{}] reached consensus with {}",
            self.config.identity, proposal
        );
        self.state = ProposerState::Decided {
            proposal,
            value: value.clone(),
        };
        Some(value)
    }

    /// Sends a request to every acceptor concurrently. Replies arrive on the
    /// returned channel; any reply arriving after it is dropped is discarded.
    fn broadcast<F>(&self, request: F) -> Replies
    where
        F: Fn(SocketAddr) -> Request,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        for acceptor in self.config.acceptors.iter().cloned() {
            let tx = tx.clone();
            let call = self.transport.invoke(acceptor, request(acceptor));
            tokio::spawn(async move {
                let _ = tx.send((acceptor, call.await));
            });
        }
        rx
    }

    async fn run_prepare(&mut self, proposal: Ballot) -> Outcome {
        let mut replies = self.broadcast(|_| Request::Prepare(PrepareRequest { proposal }));
        let round_timeout = self.config.round_timeout;
        let identity = self.config.identity;
        let mut tally = Tally::new(self.config.acceptors.len());

        let adopted = &mut self.adopted;
        let highest = &mut self.highest;
        let collect = async {
            while let Some((acceptor, reply)) = replies.recv().await {
                let granted =
                    receive_promise(identity, proposal, acceptor, reply, adopted, highest);
                if let Some(outcome) = tally.record(acceptor, granted) {
                    return outcome;
                }
            }
            Outcome::Split
        };

        let outcome = timeout(round_timeout, collect)
            .await
            .unwrap_or(Outcome::TimedOut);
        self.late_promises.push((proposal, replies));
        outcome
    }

    async fn run_accept(&mut self, proposal: Ballot, value: &Value) -> Outcome {
        let mut replies = self.broadcast(|acceptor| {
            Request::Accept(AcceptRequest {
                proposal,
                acceptor,
                value: value.clone(),
            })
        });
        let identity = self.config.identity;
        let mut tally = Tally::new(self.config.acceptors.len());

        let collect = async {
            while let Some((acceptor, reply)) = replies.recv().await {
                let granted = match reply {
                    Ok(Response::Accepted(accepted))
                        if accepted.proposal == proposal && accepted.acceptor == acceptor =>
                    {
                        accepted.accepted
                    }
                    Ok(other) => {
                        warn!(
                            "[proposer:{}] mismatched reply to ACCEPT {} from {}: {:?}",
                            identity, proposal, acceptor, other
                        );
                        false
                    }
                    Err(e) => {
                        debug!(
                            "[proposer:{}] ACCEPT {} to {} failed: {}",
                            identity, proposal, acceptor, e
                        );
                        false
                    }
                };

                if let Some(outcome) = tally.record(acceptor, granted) {
                    return outcome;
                }
            }
            Outcome::Split
        };

        timeout(self.config.round_timeout, collect)
            .await
            .unwrap_or(Outcome::TimedOut)
    }
}

/// Handles a reply to PREPARE `proposal` sent to `acceptor`. Returns whether
/// the acceptor promised.
///
/// Any prior accepted ballot moves `highest` so the next ballot outbids it,
/// but only a granted promise can change the adopted value.
fn receive_promise(
    identity: NodeId,
    proposal: Ballot,
    acceptor: SocketAddr,
    reply: Result<Response, TransportError>,
    adopted: &mut Option<(Ballot, Value)>,
    highest: &mut Option<Ballot>,
) -> bool {
    match reply {
        Ok(Response::Promise(promise))
            if promise.proposal == proposal && promise.acceptor == acceptor =>
        {
            if let Some((ballot, _)) = promise.prior {
                *highest = max(*highest, Some(ballot));
            }
            if promise.promised {
                adopt(identity, adopted, promise.prior);
            }
            promise.promised
        }
        Ok(other) => {
            warn!(
                "[proposer:{}] mismatched reply to PREPARE {} from {}: {:?}",
                identity, proposal, acceptor, other
            );
            false
        }
        Err(e) => {
            debug!(
                "[proposer:{}] PREPARE {} to {} failed: {}",
                identity, proposal, acceptor, e
            );
            false
        }
    }
}

/// Replaces the adopted value when `prior` was accepted under a higher ballot.
fn adopt(
    identity: NodeId,
    adopted: &mut Option<(Ballot, Value)>,
    prior: Option<(Ballot, Value)>,
) {
    let (ballot, value) = match prior {
        Some(prior) => prior,
        None => return,
    };
    let higher = match *adopted {
        Some((current, _)) => current < ballot,
        None => true,
    };
    if higher {
        trace!("[proposer:{}] adopting value accepted with {}", identity, ballot);
        *adopted = Some((ballot, value));
    }
}
