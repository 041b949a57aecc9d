use std::cmp::Ordering;

/// Number of responses required for a majority of `nodes` acceptors.
pub fn quorum_size(nodes: usize) -> usize {
    1 + (nodes / 2)
}

/// `QuorumSet` tracks nodes that have sent certain messages and will
/// detect when quorum is reached. Duplicates are treated as a single
/// message to determine quorum.
///
/// Once the `QuorumSet` has quorum, additional nodes will not be added.
/// The purpose of the datastructure is to track _when_ quorum is
/// reached rather than being a general purpose set.
#[derive(Clone, Debug)]
pub struct QuorumSet<N> {
    // Instead of using a HashSet or Vec, which may allocate more
    // than once, the QuorumSet has a specific size as a sized slice.
    // The datastructure ensures that the nodes are stored in
    // sorted order.
    //
    // Quorums are typically small (2-4 nodes) so a smaller
    // data structure that isn't fancy is appropriate both
    // from a run time perspective and space perspective.
    values: Box<[Option<N>]>,
}

impl<N: Ord + Copy> QuorumSet<N> {
    /// Creates a QuorumSet with a given size for quorum.
    pub fn with_size(size: usize) -> QuorumSet<N> {
        assert!(size > 0);
        QuorumSet {
            values: vec![None; size].into_boxed_slice(),
        }
    }

    /// Creates a QuorumSet for a majority of `nodes`.
    pub fn majority_of(nodes: usize) -> QuorumSet<N> {
        QuorumSet::with_size(quorum_size(nodes))
    }

    /// Flag indicating whether quorum has been reached.
    pub fn has_quorum(&self) -> bool {
        let s = &self.values;
        s[s.len() - 1].is_some()
    }

    #[inline]
    fn binary_search(&self, n: &N) -> Result<usize, usize> {
        self.values.binary_search_by(move |v| match v {
            Some(v) => v.cmp(n),
            None => Ordering::Greater,
        })
    }

    /// Inserts a node into the set
    pub fn insert(&mut self, n: N) {
        if self.has_quorum() {
            return;
        }

        if let Err(loc) = self.binary_search(&n) {
            // if theres an existing occupant, shift everything
            // right to make a hole for the new value
            if self.values[loc].is_some() {
                let len = self.values.len();
                for i in (loc..len - 1).rev() {
                    self.values.swap(i, i + 1);
                }
            }

            self.values[loc] = Some(n);
        }
    }

    /// Flag indicating whether the set contains a given node
    pub fn contains(&self, n: &N) -> bool {
        self.binary_search(n).is_ok()
    }

    /// Removes a node from the set
    pub fn remove(&mut self, n: &N) {
        if let Ok(ind) = self.binary_search(n) {
            self.values[ind] = None;

            // move all elements to the left to fill the hole
            let len = self.values.len();
            for i in ind + 1..len {
                self.values.swap(i - 1, i);
            }
        }
    }

    /// Number of distinct nodes in the set
    pub fn len(&self) -> usize {
        self.values.iter().take_while(|v| v.is_some()).count()
    }

    /// Flag indicating whether the set is empty
    pub fn is_empty(&self) -> bool {
        self.values[0].is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quorum_arithmetic() {
        assert_eq!(1, quorum_size(1));
        assert_eq!(2, quorum_size(2));
        assert_eq!(2, quorum_size(3));
        assert_eq!(3, quorum_size(4));
        assert_eq!(3, quorum_size(5));
    }

    #[test]
    fn quorumset() {
        let mut qs = QuorumSet::with_size(4);

        assert!(!qs.has_quorum());
        assert!(qs.is_empty());

        qs.insert(5);
        assert!(qs.contains(&5));
        assert!(!qs.has_quorum());
        assert_eq!(&[Some(5), None, None, None], qs.values.as_ref());

        qs.insert(7);
        qs.insert(7);
        assert_eq!(2, qs.len());
        assert_eq!(&[Some(5), Some(7), None, None], qs.values.as_ref());

        qs.insert(2);
        assert!(!qs.has_quorum());
        assert_eq!(&[Some(2), Some(5), Some(7), None], qs.values.as_ref());

        qs.insert(6);
        assert!(qs.has_quorum());
        assert_eq!(&[Some(2), Some(5), Some(6), Some(7)], qs.values.as_ref());

        qs.remove(&5);
        assert!(!qs.contains(&5));
        assert!(!qs.has_quorum());
        assert_eq!(&[Some(2), Some(6), Some(7), None], qs.values.as_ref());

        qs.insert(1);
        qs.remove(&7);
        assert_eq!(&[Some(1), Some(2), Some(6), None], qs.values.as_ref());

        // ignore adds when there is quorum
        qs.insert(7);
        qs.insert(10);
        assert_eq!(&[Some(1), Some(2), Some(6), Some(7)], qs.values.as_ref());
    }

    #[test]
    fn quorum_one() {
        let mut qs = QuorumSet::majority_of(1);
        assert!(qs.is_empty());
        assert!(!qs.has_quorum());

        qs.insert("127.0.0.1:4101");
        assert!(!qs.is_empty());
        assert!(qs.has_quorum());
    }

    #[test]
    fn socket_addresses() {
        let a: std::net::SocketAddr = "127.0.0.1:4101".parse().unwrap();
        let b: std::net::SocketAddr = "127.0.0.1:4102".parse().unwrap();
        let mut qs = QuorumSet::majority_of(3);
        qs.insert(b);
        qs.insert(b);
        assert!(!qs.has_quorum());
        qs.insert(a);
        assert!(qs.has_quorum());
        assert!(qs.contains(&a));
    }
}
