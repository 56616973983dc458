//! Friend-request delivery: outbound retry/backoff queue and inbound
//! decode-and-surface handling.
//!
//! Delivery itself is injected through [`RequestTransport`] so production
//! code routes requests through the DHT and tests use an in-memory fake.

use std::collections::HashMap;
use std::future::Future;

use tracing::{debug, info};

use tox_crypto::keys::PublicKey32;
use tox_transport::retry::{Backoff, BackoffConfig};

/// A friend request awaiting delivery.
#[derive(Clone, Debug)]
pub struct PendingRequest {
    pub target: PublicKey32,
    pub message: String,
    attempts: u32,
}

/// Network access required to attempt delivery of one friend request,
/// injected so production code can be DHT-routed and tests can fake it.
pub trait RequestTransport: Send + Sync {
    /// Attempt to deliver `message` to `target`. Returns whether delivery
    /// succeeded (e.g. the DHT found a path and the peer acknowledged).
    fn deliver(&self, target: PublicKey32, message: &str) -> impl Future<Output = bool> + Send;
}

/// Outbound friend-request queue with per-target dedup and bounded retry.
pub struct RequestQueue {
    pending: HashMap<[u8; 32], PendingRequest>,
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestQueue {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Enqueue a request. A duplicate enqueue to the same target updates
    /// the message in place rather than creating a second request or
    /// resetting its attempt count.
    pub fn enqueue(&mut self, target: PublicKey32, message: String) {
        self.pending
            .entry(target.0)
            .and_modify(|existing| existing.message = message.clone())
            .or_insert(PendingRequest {
                target,
                message,
                attempts: 0,
            });
    }

    pub fn is_pending(&self, target: &PublicKey32) -> bool {
        self.pending.contains_key(&target.0)
    }

    /// Remove a pending request, e.g. when the target friend is deleted.
    /// A no-op if no request to `target` is queued.
    pub fn remove(&mut self, target: &PublicKey32) {
        self.pending.remove(&target.0);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Attempt delivery of every pending request once. Requests that
    /// succeed are removed; requests that have exhausted their attempt
    /// budget are dropped and returned as `dropped`.
    pub async fn drive_once<T: RequestTransport>(&mut self, transport: &T) -> DriveOutcome {
        let config = BackoffConfig::friend_request();
        let mut delivered = Vec::new();
        let mut dropped = Vec::new();

        let targets: Vec<[u8; 32]> = self.pending.keys().copied().collect();
        for key in targets {
            let Some(request) = self.pending.get(&key) else {
                continue;
            };
            if transport.deliver(request.target, &request.message).await {
                info!(?key, "friend request delivered");
                delivered.push(key);
                continue;
            }

            let request = self.pending.get_mut(&key).expect("just looked up");
            request.attempts += 1;
            if request.attempts >= config.max_attempts {
                debug!(?key, attempts = request.attempts, "friend request dropped, attempts exhausted");
                dropped.push(key);
            }
        }

        for key in &delivered {
            self.pending.remove(key);
        }
        for key in &dropped {
            self.pending.remove(key);
        }

        DriveOutcome {
            delivered: delivered.len(),
            dropped: dropped.len(),
        }
    }
}

/// The result of one `drive_once` pass over the queue.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DriveOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

/// Compute the delay before the next retry attempt, following the same
/// exponential-backoff shape as DHT bootstrap but with the friend-request
/// preset (5s initial, x2, ceiling, max 10 attempts).
pub fn next_retry_delay(backoff: &mut Backoff, rng: &mut impl rand::Rng) -> Option<std::time::Duration> {
    backoff.next_delay(rng)
}

/// An inbound friend request, surfaced to the host for explicit
/// accept/reject. The engine never auto-adds a sender to the friend list.
#[derive(Clone, Debug)]
pub struct IncomingRequest {
    pub sender: PublicKey32,
    pub message: String,
}

/// Decide whether an inbound request should be surfaced to the host: it is
/// suppressed if the sender is already a friend.
pub fn should_surface(sender: &PublicKey32, table: &crate::table::FriendTable) -> bool {
    table.find_by_public_key(sender).is_none()
}
