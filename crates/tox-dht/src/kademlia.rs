//! Kademlia routing table with XOR-distance metric.
//!
//! A node's ID is its long-term public key; distance between two nodes is
//! the bytewise XOR of their public keys, read as a 256-bit big-endian
//! integer. Bucket `i` holds nodes whose distance from the local node has
//! its first differing bit at position `i`.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{DhtError, Result, K, NUM_BUCKETS};

/// A node identifier: the node's long-term Curve25519 public key.
pub type NodeId = [u8; 32];

/// Liveness status of a routing-table entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Freshly inserted, not yet confirmed responsive.
    Unknown,
    /// Failed to respond to the last maintenance ping.
    Bad,
    /// Responded within the maintenance window.
    Good,
}

/// A single routing-table entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: NodeId,
    pub net_addr: NetAddr,
    pub last_seen: u64,
    pub status: NodeStatus,
}

/// A serializable stand-in for `std::net::SocketAddr`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetAddr(pub SocketAddr);

/// Compute the XOR distance between two node IDs.
pub fn xor_distance(a: &NodeId, b: &NodeId) -> [u8; 32] {
    let mut out = [0u8; 32];
    for i in 0..32 {
        out[i] = a[i] ^ b[i];
    }
    out
}

/// Number of leading zero bits in a 256-bit big-endian value, i.e. the
/// bucket index a node at this distance belongs in.
fn leading_zero_bits(distance: &[u8; 32]) -> Option<usize> {
    for (byte_idx, byte) in distance.iter().enumerate() {
        if *byte != 0 {
            return Some(byte_idx * 8 + byte.leading_zeros() as usize);
        }
    }
    None
}

/// A single k-bucket: a bounded ordered list of up to `K` nodes.
#[derive(Clone, Debug, Default)]
struct KBucket {
    entries: Vec<NodeInfo>,
}

impl KBucket {
    fn find_index(&self, node_id: &NodeId) -> Option<usize> {
        self.entries.iter().position(|e| &e.node_id == node_id)
    }

    fn is_full(&self) -> bool {
        self.entries.len() >= K
    }

    fn first_bad_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.status == NodeStatus::Bad)
    }
}

/// Result of attempting to insert a node into the routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Newly inserted into a bucket with room.
    Inserted,
    /// Already present; moved to the most-recently-seen position.
    Updated,
    /// The node's ID was the local ID; never inserted.
    IgnoredSelf,
    /// Replaced the first `bad` entry in a full bucket.
    ReplacedBad,
    /// Bucket was full with no `bad` entry to evict; newcomer rejected.
    Rejected,
}

/// The 256-bucket Kademlia routing table.
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<KBucket>,
}

impl RoutingTable {
    /// Create an empty routing table for `local_id`.
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            buckets: (0..NUM_BUCKETS).map(|_| KBucket::default()).collect(),
        }
    }

    pub fn local_id(&self) -> &NodeId {
        &self.local_id
    }

    fn bucket_index(&self, node_id: &NodeId) -> Option<usize> {
        let distance = xor_distance(&self.local_id, node_id);
        leading_zero_bits(&distance)
    }

    /// Insert or refresh a node, per the bucket-insert rule: if present,
    /// move to the most-recently-seen end; else append if room; else
    /// replace the first `bad` entry; else reject.
    pub fn insert(&mut self, info: NodeInfo) -> InsertOutcome {
        let Some(idx) = self.bucket_index(&info.node_id) else {
            return InsertOutcome::IgnoredSelf;
        };
        let bucket = &mut self.buckets[idx];

        if let Some(existing_idx) = bucket.find_index(&info.node_id) {
            bucket.entries.remove(existing_idx);
            bucket.entries.push(info);
            return InsertOutcome::Updated;
        }

        if !bucket.is_full() {
            bucket.entries.push(info);
            return InsertOutcome::Inserted;
        }

        if let Some(bad_idx) = bucket.first_bad_index() {
            bucket.entries.remove(bad_idx);
            bucket.entries.push(info);
            return InsertOutcome::ReplacedBad;
        }

        InsertOutcome::Rejected
    }

    /// Mark a node's status, e.g. after a maintenance ping succeeds or
    /// times out. A no-op if the node is not present.
    pub fn set_status(&mut self, node_id: &NodeId, status: NodeStatus) {
        if let Some(idx) = self.bucket_index(node_id) {
            if let Some(entry) = self.buckets[idx]
                .entries
                .iter_mut()
                .find(|e| &e.node_id == node_id)
            {
                entry.status = status;
            }
        }
    }

    /// Remove a node from the table, if present.
    pub fn remove(&mut self, node_id: &NodeId) -> Option<NodeInfo> {
        let idx = self.bucket_index(node_id)?;
        let bucket = &mut self.buckets[idx];
        let entry_idx = bucket.find_index(node_id)?;
        Some(bucket.entries.remove(entry_idx))
    }

    /// The closest `count` known nodes to `target`, sorted by ascending
    /// XOR distance. Ties broken by most-recent `last_seen`, then
    /// lexicographic public-key order, for determinism.
    pub fn find_closest(&self, target: &NodeId, count: usize) -> Vec<NodeInfo> {
        let mut all: Vec<NodeInfo> = self
            .buckets
            .iter()
            .flat_map(|b| b.entries.iter().cloned())
            .collect();

        all.sort_by(|a, b| {
            let da = xor_distance(&a.node_id, target);
            let db = xor_distance(&b.node_id, target);
            da.cmp(&db)
                .then_with(|| b.last_seen.cmp(&a.last_seen))
                .then_with(|| a.node_id.cmp(&b.node_id))
        });

        all.truncate(count);
        all
    }

    /// Total number of nodes across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bucket indices holding at least one node but fewer than half
    /// capacity, for the maintenance step's neighbor-refresh trigger.
    pub fn below_half_capacity(&self) -> Vec<usize> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.entries.is_empty() && b.entries.len() < K / 2)
            .map(|(i, _)| i)
            .collect()
    }

    /// The oldest-seen node in each non-empty bucket, for the maintenance
    /// ping step.
    pub fn oldest_per_bucket(&self) -> Vec<NodeInfo> {
        self.buckets
            .iter()
            .filter_map(|b| b.entries.iter().min_by_key(|e| e.last_seen).cloned())
            .collect()
    }

    /// The most-recently-seen entry in bucket `idx`, used as the contact
    /// point for a neighbor-refresh `get-nodes` when that bucket is below
    /// half capacity. `None` if the bucket is empty or out of range.
    pub fn freshest_in_bucket(&self, idx: usize) -> Option<NodeInfo> {
        self.buckets.get(idx)?.entries.iter().max_by_key(|e| e.last_seen).cloned()
    }
}

/// Attempt to replace the first `bad` node in the bucket housing `stale_id`
/// with `new_node`, returning an error if there is no `bad` entry to
/// replace.
pub fn evict_bad_and_insert(
    table: &mut RoutingTable,
    stale_id: &NodeId,
    new_node: NodeInfo,
) -> Result<()> {
    let idx = table
        .bucket_index(stale_id)
        .ok_or(DhtError::BucketFull)?;
    let bucket = &mut table.buckets[idx];
    match bucket.first_bad_index() {
        Some(bad_idx) => {
            bucket.entries.remove(bad_idx);
            bucket.entries.push(new_node);
            Ok(())
        }
        None => Err(DhtError::BucketFull),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id_byte: u8, last_seen: u64, status: NodeStatus) -> NodeInfo {
        let mut node_id = [0u8; 32];
        node_id[31] = id_byte;
        NodeInfo {
            node_id,
            net_addr: NetAddr("127.0.0.1:33445".parse().unwrap()),
            last_seen,
            status,
        }
    }

    /// A node whose ID always lands in the same bucket (fixed leading byte)
    /// but is otherwise distinguished by `unique_byte`, for tests that need
    /// several entries to collide into one bucket.
    fn node_in_fixed_bucket(unique_byte: u8, last_seen: u64, status: NodeStatus) -> NodeInfo {
        let mut node_id = [0u8; 32];
        node_id[0] = 1;
        node_id[31] = unique_byte;
        NodeInfo {
            node_id,
            net_addr: NetAddr("127.0.0.1:33445".parse().unwrap()),
            last_seen,
            status,
        }
    }

    #[test]
    fn test_insert_and_find_closest() {
        let mut table = RoutingTable::new([0u8; 32]);
        for i in 1..5 {
            table.insert(node(i, i as u64, NodeStatus::Good));
        }
        assert_eq!(table.len(), 4);

        let closest = table.find_closest(&[0u8; 32], 2);
        assert_eq!(closest.len(), 2);
    }

    #[test]
    fn test_self_insert_ignored() {
        let mut table = RoutingTable::new([0u8; 32]);
        let outcome = table.insert(node(0, 1, NodeStatus::Good));
        assert_eq!(outcome, InsertOutcome::IgnoredSelf);
        assert!(table.is_empty());
    }

    #[test]
    fn test_duplicate_insert_updates() {
        let mut table = RoutingTable::new([0u8; 32]);
        table.insert(node(1, 1, NodeStatus::Good));
        let outcome = table.insert(node(1, 2, NodeStatus::Good));
        assert_eq!(outcome, InsertOutcome::Updated);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_bucket_full_replaces_bad_entry() {
        let mut table = RoutingTable::new([0u8; 32]);
        for i in 0..K as u8 {
            table.insert(node_in_fixed_bucket(i + 1, i as u64, NodeStatus::Good));
        }
        assert_eq!(table.len(), K);

        // Mark one as bad so the next insert has something to replace.
        let mut bad_id = [0u8; 32];
        bad_id[0] = 1;
        bad_id[31] = 1;
        table.set_status(&bad_id, NodeStatus::Bad);

        let outcome = table.insert(node_in_fixed_bucket(200, 999, NodeStatus::Good));
        assert_eq!(outcome, InsertOutcome::ReplacedBad);
        assert_eq!(table.len(), K);
    }

    #[test]
    fn test_bucket_full_rejects_without_bad_entry() {
        let mut table = RoutingTable::new([0u8; 32]);
        for i in 0..K as u8 {
            table.insert(node_in_fixed_bucket(i + 1, i as u64, NodeStatus::Good));
        }
        let outcome = table.insert(node_in_fixed_bucket(200, 999, NodeStatus::Good));
        assert_eq!(outcome, InsertOutcome::Rejected);
        assert_eq!(table.len(), K);
    }

    #[test]
    fn test_xor_distance_closest_tie_break_by_recency() {
        let mut table = RoutingTable::new([0u8; 32]);
        // Two distinct nodes equidistant from target is contrived via
        // construction below: instead, verify recency ordering among nodes
        // already at different distances is at least stable and
        // deterministic across repeated calls.
        table.insert(node(3, 10, NodeStatus::Good));
        table.insert(node(5, 20, NodeStatus::Good));
        let first = table.find_closest(&[0u8; 32], 2);
        let second = table.find_closest(&[0u8; 32], 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_remove_node() {
        let mut table = RoutingTable::new([0u8; 32]);
        table.insert(node(7, 1, NodeStatus::Good));
        let mut id = [0u8; 32];
        id[31] = 7;
        assert!(table.remove(&id).is_some());
        assert!(table.is_empty());
    }
}
