use crate::ballot::Ballot;
use crate::config::AcceptorConfig;
use crate::error::ConfigurationError;
use crate::messages::*;
use crate::transport::{Receiver, Transport};
use futures_util::future::BoxFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Encoding of Acceptor (persistent Paxos memory) role
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AcceptorState {
    /// last promised ballot within this instance
    promised: Option<Ballot>,
    /// last accepted ballot/value pair within this instance
    accepted: Option<(Ballot, Value)>,
}

impl AcceptorState {
    /// Ballot of the last promise
    pub fn promised(&self) -> Option<Ballot> {
        self.promised
    }

    /// Last accepted ballot and value
    pub fn accepted(&self) -> Option<&(Ballot, Value)> {
        self.accepted.as_ref()
    }

    /// Handler for a PREPARE message sent from a proposer. The acceptor promises
    /// not to accept ballots below `proposal` if it has not already promised an
    /// equal or higher ballot.
    ///
    /// The previously accepted value is reported either way so the proposer can
    /// see conflicting history.
    pub fn receive_prepare(&mut self, me: SocketAddr, prepare: PrepareRequest) -> PromiseResponse {
        let PrepareRequest { proposal } = prepare;

        let promised = match self.promised {
            Some(b) if b >= proposal => {
                debug!("Rejecting PREPARE {} with promised {}", proposal, b);
                false
            }
            _ => {
                debug!("Promising {}", proposal);
                self.promised = Some(proposal);
                true
            }
        };

        PromiseResponse {
            acceptor: me,
            proposal,
            promised,
            prior: self.accepted.clone(),
        }
    }

    /// Handler for an ACCEPT message, which is sent from a proposer when a quorum
    /// for the Phase 1 PREPARE has been made from acceptors. Only the ballot that
    /// was promised last is accepted.
    pub fn receive_accept(&mut self, me: SocketAddr, accept: AcceptRequest) -> AcceptedResponse {
        let AcceptRequest { proposal, value, .. } = accept;

        if self.promised != Some(proposal) {
            debug!(
                "Rejecting ACCEPT {} because promised is {:?}",
                proposal, self.promised
            );
            return AcceptedResponse {
                proposal,
                acceptor: me,
                accepted: false,
                value: None,
            };
        }

        debug!("Accepting proposal {}", proposal);
        self.promised = Some(proposal);
        self.accepted = Some((proposal, value.clone()));

        AcceptedResponse {
            proposal,
            acceptor: me,
            accepted: true,
            value: Some(value),
        }
    }

    /// Clears all promises and accepted values, starting a new consensus instance.
    pub fn reset(&mut self) {
        self.promised = None;
        self.accepted = None;
    }
}

/// Acceptor role served over a transport. Requests are handled concurrently
/// but each read-modify-write of the state is serialized.
pub struct Acceptor<T> {
    address: SocketAddr,
    learners: Arc<[SocketAddr]>,
    transport: T,
    state: Mutex<AcceptorState>,
}

impl<T: Transport> Acceptor<T> {
    pub fn new(config: AcceptorConfig, transport: T) -> Result<Acceptor<T>, ConfigurationError> {
        config.validate()?;
        Ok(Acceptor {
            address: config.address,
            learners: config.learners.into(),
            transport,
            state: Mutex::new(AcceptorState::default()),
        })
    }

    /// Address this acceptor answers on
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Snapshot of the current state
    pub async fn state(&self) -> AcceptorState {
        self.state.lock().await.clone()
    }

    pub async fn prepare(&self, prepare: PrepareRequest) -> PromiseResponse {
        self.state.lock().await.receive_prepare(self.address, prepare)
    }

    pub async fn accept(&self, accept: AcceptRequest) -> AcceptedResponse {
        if accept.acceptor != self.address {
            warn!(
                "ACCEPT {} addressed to {} received at {}",
                accept.proposal, accept.acceptor, self.address
            );
        }

        let accepted = self.state.lock().await.receive_accept(self.address, accept);
        if accepted.accepted {
            self.notify_learners(&accepted);
        }
        accepted
    }

    pub async fn reset(&self) {
        self.state.lock().await.reset();
    }

    /// Fire-and-forget fan-out of an ACCEPTED message. Failures are logged
    /// and never retried.
    fn notify_learners(&self, accepted: &AcceptedResponse) {
        for learner in self.learners.iter().cloned() {
            let transport = self.transport.clone();
            let request = Request::Learn(accepted.clone());
            tokio::spawn(async move {
                if let Err(e) = transport.invoke(learner, request).await {
                    debug!("Failed to notify learner {}: {}", learner, e);
                }
            });
        }
    }
}

impl<T: Transport> Receiver for Acceptor<T> {
    fn receive(&self, request: Request) -> BoxFuture<'_, Option<Response>> {
        Box::pin(async move {
            match request {
                Request::Prepare(prepare) => Some(Response::Promise(self.prepare(prepare).await)),
                Request::Accept(accept) => Some(Response::Accepted(self.accept(accept).await)),
                Request::Learn(_) => None,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LearnerConfig;
    use crate::learner::Learner;
    use crate::transport::LocalNetwork;
    use bytes::Bytes;
    use lazy_static::lazy_static;
    use std::time::Duration;

    lazy_static! {
        static ref ME: SocketAddr = "127.0.0.1:4101".parse().unwrap();
        static ref LEARNER: SocketAddr = "127.0.0.1:4201".parse().unwrap();
    }

    fn accept(proposal: Ballot, value: &'static str) -> AcceptRequest {
        AcceptRequest {
            proposal,
            acceptor: *ME,
            value: Bytes::from(value),
        }
    }

    #[test]
    fn receive_prepare() {
        let mut acceptor = AcceptorState::default();

        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 1) });
        assert_eq!(
            PromiseResponse {
                acceptor: *ME,
                proposal: Ballot(1, 1),
                promised: true,
                prior: None,
            },
            promise
        );
        assert_eq!(Some(Ballot(1, 1)), acceptor.promised());

        // higher ballot supersedes the promise
        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 2) });
        assert!(promise.promised);
        assert_eq!(Some(Ballot(1, 2)), acceptor.promised());

        // lower and equal ballots are rejected
        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 1) });
        assert!(!promise.promised);
        assert_eq!(Ballot(1, 1), promise.proposal);
        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 2) });
        assert!(!promise.promised);
        assert_eq!(Some(Ballot(1, 2)), acceptor.promised());
    }

    #[test]
    fn prepare_reports_prior_value() {
        let mut acceptor = AcceptorState::default();
        acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(2, 1) });
        assert!(acceptor.receive_accept(*ME, accept(Ballot(2, 1), "100")).accepted);

        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(3, 2) });
        assert!(promise.promised);
        assert_eq!(Some((Ballot(2, 1), Bytes::from("100"))), promise.prior);

        // rejected promises still carry the accepted value
        let promise = acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 3) });
        assert!(!promise.promised);
        assert_eq!(Some((Ballot(2, 1), Bytes::from("100"))), promise.prior);
    }

    #[test]
    fn receive_accept() {
        let mut acceptor = AcceptorState::default();

        // nothing promised
        let accepted = acceptor.receive_accept(*ME, accept(Ballot(1, 1), "100"));
        assert!(!accepted.accepted);
        assert_eq!(None, accepted.value);
        assert_eq!(None, acceptor.accepted());

        acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(2, 1) });

        // only the exact promised ballot is accepted, higher ones included
        assert!(!acceptor.receive_accept(*ME, accept(Ballot(1, 1), "100")).accepted);
        assert!(!acceptor.receive_accept(*ME, accept(Ballot(3, 1), "100")).accepted);

        let accepted = acceptor.receive_accept(*ME, accept(Ballot(2, 1), "100"));
        assert_eq!(
            AcceptedResponse {
                proposal: Ballot(2, 1),
                acceptor: *ME,
                accepted: true,
                value: Some(Bytes::from("100")),
            },
            accepted
        );
        assert_eq!(Some(&(Ballot(2, 1), Bytes::from("100"))), acceptor.accepted());
        assert_eq!(Some(Ballot(2, 1)), acceptor.promised());

        // superseded by a newer promise
        acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(3, 2) });
        assert!(!acceptor.receive_accept(*ME, accept(Ballot(2, 1), "101")).accepted);
        assert_eq!(Some(&(Ballot(2, 1), Bytes::from("100"))), acceptor.accepted());
    }

    #[test]
    fn accept_resend_is_idempotent() {
        let mut acceptor = AcceptorState::default();
        acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 1) });

        let first = acceptor.receive_accept(*ME, accept(Ballot(1, 1), "100"));
        let snapshot = acceptor.clone();
        let second = acceptor.receive_accept(*ME, accept(Ballot(1, 1), "100"));

        assert!(first.accepted);
        assert_eq!(first, second);
        assert_eq!(snapshot, acceptor);
    }

    #[test]
    fn reset() {
        let mut acceptor = AcceptorState::default();
        acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 1) });
        acceptor.receive_accept(*ME, accept(Ballot(1, 1), "100"));

        acceptor.reset();
        assert_eq!(AcceptorState::default(), acceptor);
        assert!(acceptor.receive_prepare(*ME, PrepareRequest { proposal: Ballot(1, 1) }).promised);
    }

    #[tokio::test]
    async fn accept_notifies_learners() {
        let network = LocalNetwork::new();
        let learner = Arc::new(Learner::new(LearnerConfig::new(*LEARNER, vec![*ME])).unwrap());
        network.register(*LEARNER, learner.clone());

        let config = AcceptorConfig::new(*ME, vec![*LEARNER]);
        let acceptor = Acceptor::new(config, network.clone()).unwrap();

        acceptor.prepare(PrepareRequest { proposal: Ballot(1, 1) }).await;
        let accepted = acceptor.accept(accept(Ballot(1, 1), "100")).await;
        assert!(accepted.accepted);

        let chosen = tokio::time::timeout(Duration::from_secs(1), learner.wait_chosen())
            .await
            .unwrap();
        assert_eq!(Bytes::from("100"), chosen);
        assert_eq!(Some((Ballot(1, 1), Bytes::from("100"))), learner.last_accepted().await);
    }

    #[tokio::test]
    async fn unreachable_learner_does_not_fail_accept() {
        let network = LocalNetwork::new();
        let acceptor = Acceptor::new(AcceptorConfig::new(*ME, vec![*LEARNER]), network).unwrap();

        acceptor.prepare(PrepareRequest { proposal: Ballot(1, 1) }).await;
        assert!(acceptor.accept(accept(Ballot(1, 1), "100")).await.accepted);
        assert_eq!(
            Some(&(Ballot(1, 1), Bytes::from("100"))),
            acceptor.state().await.accepted()
        );
    }

    #[tokio::test]
    async fn serves_acceptor_requests_only() {
        let acceptor =
            Acceptor::new(AcceptorConfig::new(*ME, vec![]), LocalNetwork::new()).unwrap();

        let response = acceptor
            .receive(Request::Prepare(PrepareRequest { proposal: Ballot(1, 1) }))
            .await;
        assert!(matches!(response, Some(Response::Promise(ref p)) if p.promised));

        let response = acceptor
            .receive(Request::Learn(AcceptedResponse {
                proposal: Ballot(1, 1),
                acceptor: *ME,
                accepted: true,
                value: None,
            }))
            .await;
        assert_eq!(None, response);
    }
}
