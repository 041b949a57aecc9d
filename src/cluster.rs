//! Assembly of a complete consensus group inside one process.
use crate::acceptor::Acceptor;
use crate::config::ClusterConfig;
use crate::error::ConfigurationError;
use crate::learner::Learner;
use crate::proposer::Proposer;
use crate::transport::LocalNetwork;
use std::sync::Arc;

/// Every role of a cluster wired onto a shared `LocalNetwork`.
///
/// Acceptors and learners are registered on the network under their
/// configured addresses. Proposers are owned by the cluster and may be moved
/// out to run concurrently.
pub struct Cluster {
    pub proposers: Vec<Proposer<LocalNetwork>>,
    pub acceptors: Vec<Arc<Acceptor<LocalNetwork>>>,
    pub learners: Vec<Arc<Learner>>,
    network: LocalNetwork,
}

impl Cluster {
    pub fn local(config: ClusterConfig) -> Result<Cluster, ConfigurationError> {
        config.validate()?;
        let network = LocalNetwork::new();

        let mut learners = Vec::with_capacity(config.learners.len());
        for address in &config.learners {
            let learner = Arc::new(Learner::new(config.learner(*address))?);
            network.register(*address, learner.clone());
            learners.push(learner);
        }

        let mut acceptors = Vec::with_capacity(config.acceptors.len());
        for address in &config.acceptors {
            let acceptor = Arc::new(Acceptor::new(config.acceptor(*address), network.clone())?);
            network.register(*address, acceptor.clone());
            acceptors.push(acceptor);
        }

        let proposers = config
            .proposers
            .iter()
            .map(|id| Proposer::new(config.proposer(*id), network.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            "Local cluster with {} proposers, {} acceptors, {} learners",
            proposers.len(),
            acceptors.len(),
            learners.len()
        );
        Ok(Cluster {
            proposers,
            acceptors,
            learners,
            network,
        })
    }

    /// Network the roles communicate over, for fault injection
    pub fn network(&self) -> &LocalNetwork {
        &self.network
    }

    /// Clears every role, starting a new consensus instance.
    pub async fn reset(&mut self) {
        for proposer in &mut self.proposers {
            proposer.reset();
        }
        for acceptor in &self.acceptors {
            acceptor.reset().await;
        }
        for learner in &self.learners {
            learner.reset().await;
        }
        debug!("Cluster reset");
    }
}
