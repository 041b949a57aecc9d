//! Static membership and tuning for each role.
//!
//! Configuration is supplied at construction time and validated before any
//! round begins. Malformed configuration is the one failure the protocol does
//! not absorb.
use crate::ballot::NodeId;
use crate::error::ConfigurationError;
use crate::quorum::quorum_size;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Default time a proposer waits on a single phase of a round.
pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_millis(200);
/// Starting wait between abandoned rounds
const DEFAULT_BACKOFF_INITIAL: Duration = Duration::from_millis(10);
/// Cap on the wait between abandoned rounds
const DEFAULT_BACKOFF_MAX: Duration = Duration::from_millis(200);

/// Jittered exponential backoff applied between abandoned rounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffConfig {
    fn default() -> BackoffConfig {
        BackoffConfig {
            initial: DEFAULT_BACKOFF_INITIAL,
            max: DEFAULT_BACKOFF_MAX,
        }
    }
}

impl BackoffConfig {
    /// Retry immediately after an abandoned round.
    pub fn none() -> BackoffConfig {
        BackoffConfig {
            initial: Duration::from_millis(0),
            max: Duration::from_millis(0),
        }
    }

    /// A zero initial wait never doubles, so it is only allowed with a zero cap.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let zero = Duration::from_millis(0);
        if self.initial == zero && self.max > zero {
            return Err(ConfigurationError::ZeroInitialBackoff);
        }
        Ok(())
    }
}

/// Configuration of a proposer
#[derive(Clone, Debug)]
pub struct ProposerConfig {
    /// Identity of the proposer, unique across the cluster
    pub identity: NodeId,
    /// Acceptors receiving PREPARE and ACCEPT requests
    pub acceptors: Vec<SocketAddr>,
    /// Time allowed for each phase to reach either quorum
    pub round_timeout: Duration,
    pub backoff: BackoffConfig,
}

impl ProposerConfig {
    /// Creates a configuration with default timings
    pub fn new<I>(identity: NodeId, acceptors: I) -> ProposerConfig
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        ProposerConfig {
            identity,
            acceptors: acceptors.into_iter().collect(),
            round_timeout: DEFAULT_ROUND_TIMEOUT,
            backoff: BackoffConfig::default(),
        }
    }

    /// Overrides the per-phase timeout
    pub fn round_timeout(mut self, timeout: Duration) -> ProposerConfig {
        self.round_timeout = timeout;
        self
    }

    /// Overrides the backoff between rounds
    pub fn backoff(mut self, backoff: BackoffConfig) -> ProposerConfig {
        self.backoff = backoff;
        self
    }

    /// Size of quorum
    pub fn quorum_size(&self) -> usize {
        quorum_size(self.acceptors.len())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.round_timeout == Duration::from_millis(0) {
            return Err(ConfigurationError::ZeroRoundTimeout);
        }
        self.backoff.validate()?;
        validate_acceptors(&self.acceptors)
    }
}

/// Configuration of an acceptor
#[derive(Clone, Debug)]
pub struct AcceptorConfig {
    /// Address the acceptor answers on, echoed in every response
    pub address: SocketAddr,
    /// Learners notified of each accepted value
    pub learners: Vec<SocketAddr>,
}

impl AcceptorConfig {
    pub fn new<I>(address: SocketAddr, learners: I) -> AcceptorConfig
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        AcceptorConfig {
            address,
            learners: learners.into_iter().collect(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let mut seen = HashSet::with_capacity(self.learners.len());
        for learner in &self.learners {
            if !seen.insert(learner) {
                return Err(ConfigurationError::DuplicateLearner(*learner));
            }
        }
        Ok(())
    }
}

/// Configuration of a learner
#[derive(Clone, Debug)]
pub struct LearnerConfig {
    pub address: SocketAddr,
    /// Acceptors sending notifications. Only these count towards quorum.
    pub acceptors: Vec<SocketAddr>,
}

impl LearnerConfig {
    pub fn new<I>(address: SocketAddr, acceptors: I) -> LearnerConfig
    where
        I: IntoIterator<Item = SocketAddr>,
    {
        LearnerConfig {
            address,
            acceptors: acceptors.into_iter().collect(),
        }
    }

    /// Size of quorum
    pub fn quorum_size(&self) -> usize {
        quorum_size(self.acceptors.len())
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_acceptors(&self.acceptors)
    }
}

/// Membership of a whole consensus group, used to assemble every role at once.
#[derive(Clone, Debug, Default)]
pub struct ClusterConfig {
    pub proposers: Vec<NodeId>,
    pub acceptors: Vec<SocketAddr>,
    pub learners: Vec<SocketAddr>,
    pub round_timeout: Option<Duration>,
    pub backoff: Option<BackoffConfig>,
}

impl ClusterConfig {
    /// Cluster on loopback addresses. Proposer identities start at 1,
    /// acceptors listen from port 4101 and learners from port 4201.
    pub fn loopback(proposers: u32, acceptors: u16, learners: u16) -> ClusterConfig {
        ClusterConfig {
            proposers: (1..=proposers).collect(),
            acceptors: (0..acceptors)
                .map(|i| SocketAddr::from(([127, 0, 0, 1], 4101 + i)))
                .collect(),
            learners: (0..learners)
                .map(|i| SocketAddr::from(([127, 0, 0, 1], 4201 + i)))
                .collect(),
            ..ClusterConfig::default()
        }
    }

    /// Validates identities and addresses across the whole cluster.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        validate_acceptors(&self.acceptors)?;

        let mut identities = HashSet::with_capacity(self.proposers.len());
        for id in &self.proposers {
            if !identities.insert(id) {
                return Err(ConfigurationError::DuplicateIdentity(*id));
            }
        }

        let acceptors: HashSet<&SocketAddr> = self.acceptors.iter().collect();
        let mut learners = HashSet::with_capacity(self.learners.len());
        for learner in &self.learners {
            if acceptors.contains(learner) {
                return Err(ConfigurationError::SharedAddress(*learner));
            }
            if !learners.insert(learner) {
                return Err(ConfigurationError::DuplicateLearner(*learner));
            }
        }

        if self.round_timeout == Some(Duration::from_millis(0)) {
            return Err(ConfigurationError::ZeroRoundTimeout);
        }
        if let Some(backoff) = self.backoff {
            backoff.validate()?;
        }
        Ok(())
    }

    /// Configuration of the proposer with the given identity
    pub fn proposer(&self, identity: NodeId) -> ProposerConfig {
        let mut config = ProposerConfig::new(identity, self.acceptors.iter().cloned());
        if let Some(timeout) = self.round_timeout {
            config = config.round_timeout(timeout);
        }
        if let Some(backoff) = self.backoff {
            config = config.backoff(backoff);
        }
        config
    }

    /// Configuration of the acceptor at `address`
    pub fn acceptor(&self, address: SocketAddr) -> AcceptorConfig {
        AcceptorConfig::new(address, self.learners.iter().cloned())
    }

    /// Configuration of the learner at `address`
    pub fn learner(&self, address: SocketAddr) -> LearnerConfig {
        LearnerConfig::new(address, self.acceptors.iter().cloned())
    }
}

fn validate_acceptors(acceptors: &[SocketAddr]) -> Result<(), ConfigurationError> {
    if acceptors.is_empty() {
        return Err(ConfigurationError::NoAcceptors);
    }
    let mut seen = HashSet::with_capacity(acceptors.len());
    for acceptor in acceptors {
        if !seen.insert(acceptor) {
            return Err(ConfigurationError::DuplicateAcceptor(*acceptor));
        }
    }
    Ok(())
}
