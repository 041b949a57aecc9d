use serde::{Deserialize, Serialize};
use std::fmt;

/// A `NodeId` is a unique value that identifies a proposer
/// within the configuration.
pub type NodeId = u32;

/// Ballot numbering is an increasing number in order to order proposals
/// across multiple proposers. Ballots are unique in that ballot numbers between
/// proposers are unique and it is algorithmically increasing per proposer.
///
/// Ordering is lexicographic: sequence first, then the proposer identity.
#[derive(Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy, Debug)]
pub struct Ballot(pub u32, pub NodeId);

impl Ballot {
    /// Generates the ballot following `previous` for a given proposer.
    ///
    /// The sequence starts at 1 and moves up by one on each call, so the result
    /// is greater than `previous` regardless of which proposer produced it.
    pub fn next(previous: Option<Ballot>, node: NodeId) -> Ballot {
        let seq = previous.map(|b| b.0).unwrap_or(0);
        Ballot(seq + 1, node)
    }

    /// Sequence component of the ballot
    pub fn sequence(&self) -> u32 {
        self.0
    }

    /// Identity of the proposer that generated the ballot
    pub fn proposer(&self) -> NodeId {
        self.1
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}", self.0, self.1)
    }
}
