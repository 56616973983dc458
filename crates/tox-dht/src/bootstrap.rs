//! Bringing a fresh routing table from empty to populated.
//!
//! The actual `get-nodes` network round-trip is performed by the caller
//! through the [`BootstrapTransport`] trait — a real UDP send in production,
//! an in-memory fake in tests. This module only orchestrates the retry
//! schedule and routing-table bookkeeping.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use tox_transport::retry::{Backoff, BackoffConfig};

use crate::kademlia::{NodeId, NodeInfo, RoutingTable};
use crate::{DhtError, Result};

/// A seed node to contact when bootstrapping.
#[derive(Clone, Debug)]
pub struct SeedNode {
    pub addr: SocketAddr,
    pub node_id: NodeId,
}

/// Bootstrap configuration.
#[derive(Clone, Debug)]
pub struct BootstrapConfig {
    pub seeds: Vec<SeedNode>,
    /// Minimum number of usefully-responding seeds before success is
    /// declared.
    pub min_nodes: usize,
    /// Per-attempt timeout for the whole batch of seed contacts.
    pub per_attempt_timeout: Duration,
    /// Maximum number of retry rounds before giving up.
    pub max_attempts: u32,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            min_nodes: 4,
            per_attempt_timeout: Duration::from_secs(5),
            max_attempts: 5,
        }
    }
}

impl BootstrapConfig {
    fn validate(&self) -> Result<()> {
        if self.seeds.is_empty() {
            return Err(DhtError::BootstrapFailed {
                attempts: 0,
                reason: "no seed nodes configured".to_string(),
            });
        }
        Ok(())
    }
}

/// Network access required to perform a bootstrap round, injected so
/// production code uses real UDP and tests use an in-memory fake.
pub trait BootstrapTransport: Send + Sync {
    /// Send a `get-nodes` request to `seed` asking for the closest nodes to
    /// `target`. `None` means the seed never answered (timeout or send
    /// failure); `Some(nodes)` means the seed is confirmed reachable, with
    /// whatever peers it chose to share (possibly none, if its own table
    /// is still empty).
    fn get_nodes(
        &self,
        seed: &SeedNode,
        target: NodeId,
    ) -> impl Future<Output = Option<Vec<NodeInfo>>> + Send;
}

/// Outcome of a bootstrap run.
#[derive(Clone, Debug)]
pub struct BootstrapResult {
    pub responsive_seeds: usize,
    pub peers_discovered: usize,
    pub attempts: u32,
    pub success: bool,
}

enum Slot {
    Idle,
    InFlight(watch::Receiver<Option<BootstrapResult>>),
}

/// Orchestrates bootstrap attempts, deduping concurrent callers onto a
/// single in-flight attempt.
pub struct BootstrapManager {
    config: BootstrapConfig,
    slot: Mutex<Slot>,
}

impl BootstrapManager {
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::Idle),
        }
    }

    /// Bootstrap the routing table. Concurrent calls while a bootstrap is
    /// already running observe the same result instead of starting a
    /// second attempt.
    pub async fn bootstrap<T: BootstrapTransport>(
        &self,
        table: &mut RoutingTable,
        transport: &T,
    ) -> Result<BootstrapResult> {
        self.config.validate()?;

        let mut guard = self.slot.lock().await;
        if let Slot::InFlight(rx) = &*guard {
            let mut rx = rx.clone();
            drop(guard);
            loop {
                if let Some(result) = rx.borrow().clone() {
                    return Ok(result);
                }
                if rx.changed().await.is_err() {
                    return Err(DhtError::BootstrapFailed {
                        attempts: 0,
                        reason: "bootstrap leader dropped without a result".to_string(),
                    });
                }
            }
        }

        let (tx, rx) = watch::channel(None);
        *guard = Slot::InFlight(rx);
        drop(guard);

        let result = self.run(table, transport).await;

        let mut guard = self.slot.lock().await;
        *guard = Slot::Idle;
        drop(guard);
        let _ = tx.send(Some(result.clone()));

        Ok(result)
    }

    async fn run<T: BootstrapTransport>(
        &self,
        table: &mut RoutingTable,
        transport: &T,
    ) -> BootstrapResult {
        info!(seed_count = self.config.seeds.len(), "starting DHT bootstrap");

        let mut backoff = Backoff::new(BackoffConfig::dht_bootstrap());
        let mut rng = rand::thread_rng();
        let local_target = *table.local_id();

        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let mut responsive = 0usize;
            let mut discovered = 0usize;

            for seed in &self.config.seeds {
                let response = tokio::time::timeout(
                    self.config.per_attempt_timeout,
                    transport.get_nodes(seed, local_target),
                )
                .await
                .ok()
                .flatten();

                let Some(nodes) = response else {
                    continue;
                };
                responsive += 1;
                // The seed answered, so it is itself a confirmed-reachable
                // node worth routing through, independent of whatever
                // peers (if any) it shared.
                table.insert(NodeInfo {
                    node_id: seed.node_id,
                    net_addr: crate::kademlia::NetAddr(seed.addr),
                    last_seen: 0,
                    status: crate::kademlia::NodeStatus::Good,
                });
                for node in nodes {
                    table.insert(node);
                    discovered += 1;
                }
            }

            if responsive >= self.config.min_nodes.min(self.config.seeds.len()) {
                return BootstrapResult {
                    responsive_seeds: responsive,
                    peers_discovered: discovered,
                    attempts,
                    success: true,
                };
            }

            warn!(attempts, responsive, "bootstrap round under min_nodes threshold");

            if attempts >= self.config.max_attempts {
                return BootstrapResult {
                    responsive_seeds: responsive,
                    peers_discovered: discovered,
                    attempts,
                    success: false,
                };
            }

            if let Some(delay) = backoff.next_delay(&mut rng) {
                tokio::time::sleep(delay).await;
            }
        }
    }
}
