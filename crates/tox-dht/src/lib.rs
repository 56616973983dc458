//! # tox-dht
//!
//! Kademlia-style distributed hash table used for peer discovery: routing
//! table, XOR metric, iterative `FIND_NODE` lookups, and the bootstrap
//! manager that brings a fresh table from empty to populated.
//!
//! ## Key parameters
//!
//! | Parameter | Value |
//! |---|---|
//! | K (bucket size) | 8 |
//! | alpha (lookup parallelism) | 3 |
//! | Number of buckets | 256 |
//! | Default min bootstrap nodes | 4 |
//! | Default max bootstrap attempts | 5 |

pub mod bootstrap;
pub mod kademlia;
pub mod lookup;

/// Kademlia bucket size.
pub const K: usize = 8;

/// Lookup parallelism factor.
pub const ALPHA: usize = 3;

/// Number of buckets in the routing table, one per bit of the 256-bit key
/// space.
pub const NUM_BUCKETS: usize = 256;

/// Error types for DHT operations.
#[derive(Debug, thiserror::Error)]
pub enum DhtError {
    /// The routing table bucket is full and contains no `bad` entry to
    /// replace.
    #[error("bucket full, no bad node to evict")]
    BucketFull,

    /// Bootstrap failed to discover the minimum number of nodes within the
    /// retry budget.
    #[error("bootstrap failed after {attempts} attempts: {reason}")]
    BootstrapFailed { attempts: u32, reason: String },

    /// A bootstrap was already in flight; the caller's request was deduped
    /// into the existing attempt.
    #[error("bootstrap already in progress")]
    AlreadyInProgress,

    /// Network error from the transport layer.
    #[error("network error: {0}")]
    Network(#[from] tox_transport::TransportError),
}

/// Convenience result type for DHT operations.
pub type Result<T> = std::result::Result<T, DhtError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constants() {
        assert_eq!(K, 8);
        assert_eq!(ALPHA, 3);
        assert_eq!(NUM_BUCKETS, 256);
    }
}
