//! Iterative `FIND_NODE` lookup, converging on the `K` closest nodes to a
//! target by querying `ALPHA` candidates at a time.

use crate::kademlia::{xor_distance, NodeId, NodeInfo};
use crate::{ALPHA, K};

#[derive(Clone, Debug)]
struct LookupCandidate {
    info: NodeInfo,
    distance: [u8; 32],
    queried: bool,
}

/// State for a single in-flight iterative lookup.
pub struct FindNodeLookup {
    target: NodeId,
    queried: Vec<NodeId>,
    candidates: Vec<LookupCandidate>,
    result_count: usize,
}

impl FindNodeLookup {
    /// Start a lookup for `target`, seeded with the closest nodes already
    /// known locally.
    pub fn new(target: NodeId, seed_nodes: Vec<NodeInfo>) -> Self {
        let mut candidates: Vec<LookupCandidate> = seed_nodes
            .into_iter()
            .map(|info| {
                let distance = xor_distance(&info.node_id, &target);
                LookupCandidate {
                    info,
                    distance,
                    queried: false,
                }
            })
            .collect();
        candidates.sort_by(|a, b| a.distance.cmp(&b.distance));

        Self {
            target,
            queried: Vec::new(),
            candidates,
            result_count: K,
        }
    }

    /// The next batch of up to `ALPHA` un-queried candidates to send
    /// `get-nodes` requests to. Empty once the lookup has converged.
    pub fn next_queries(&mut self) -> Vec<NodeInfo> {
        let mut batch = Vec::with_capacity(ALPHA);
        for candidate in &mut self.candidates {
            if batch.len() >= ALPHA {
                break;
            }
            if !candidate.queried {
                candidate.queried = true;
                self.queried.push(candidate.info.node_id);
                batch.push(candidate.info.clone());
            }
        }
        batch
    }

    /// Fold in nodes returned by a `send-nodes` response.
    pub fn add_responses(&mut self, new_nodes: Vec<NodeInfo>) {
        for info in new_nodes {
            if self.queried.contains(&info.node_id) {
                continue;
            }
            if self.candidates.iter().any(|c| c.info.node_id == info.node_id) {
                continue;
            }
            let distance = xor_distance(&info.node_id, &self.target);
            self.candidates.push(LookupCandidate {
                info,
                distance,
                queried: false,
            });
        }
        self.candidates.sort_by(|a, b| a.distance.cmp(&b.distance));
        self.candidates.truncate(self.result_count * 3);
    }

    /// Whether the `result_count` closest known candidates have all been
    /// queried, meaning the lookup has converged.
    pub fn is_complete(&self) -> bool {
        self.candidates
            .iter()
            .take(self.result_count)
            .all(|c| c.queried)
    }

    /// The closest `result_count` nodes found so far.
    pub fn results(&self) -> Vec<NodeInfo> {
        self.candidates
            .iter()
            .take(self.result_count)
            .map(|c| c.info.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kademlia::{NetAddr, NodeStatus};

    fn node(byte: u8) -> NodeInfo {
        let mut node_id = [0u8; 32];
        node_id[31] = byte;
        NodeInfo {
            node_id,
            net_addr: NetAddr("127.0.0.1:33445".parse().unwrap()),
            last_seen: 0,
            status: NodeStatus::Good,
        }
    }

    #[test]
    fn test_lookup_converges() {
        let seeds = vec![node(1), node(2), node(3)];
        let mut lookup = FindNodeLookup::new([0u8; 32], seeds);

        assert!(!lookup.is_complete());
        let batch = lookup.next_queries();
        assert_eq!(batch.len(), 3);

        // No more unqueried candidates: next batch is empty and complete.
        assert!(lookup.next_queries().is_empty());
        assert!(lookup.is_complete());
    }

    #[test]
    fn test_add_responses_grows_candidate_set() {
        let mut lookup = FindNodeLookup::new([0u8; 32], vec![node(1)]);
        lookup.next_queries();
        lookup.add_responses(vec![node(2), node(3)]);
        assert_eq!(lookup.results().len(), 3);
    }

    #[test]
    fn test_duplicate_responses_ignored() {
        let mut lookup = FindNodeLookup::new([0u8; 32], vec![node(1)]);
        lookup.add_responses(vec![node(1)]);
        assert_eq!(lookup.results().len(), 1);
    }

    #[test]
    fn test_alpha_batch_size_respected() {
        let seeds: Vec<NodeInfo> = (1..10).map(node).collect();
        let mut lookup = FindNodeLookup::new([0u8; 32], seeds);
        assert_eq!(lookup.next_queries().len(), ALPHA);
    }
}
