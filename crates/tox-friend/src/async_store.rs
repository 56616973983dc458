//! The async message store every node also serves: encrypted offline
//! envelopes addressed by public key, capacity-limited with oldest-first
//! eviction, and the one-time pre-key exchange that keeps the async path
//! forward-secret.

use std::collections::{HashMap, VecDeque};

use tox_crypto::keys::PublicKey32;

use crate::messages::MessageId;
use crate::{FriendError, FriendId, Result};

/// An encrypted envelope queued for a recipient who was offline when it
/// was sent.
#[derive(Clone, Debug)]
pub struct Envelope {
    pub sender: PublicKey32,
    /// The nonce `ciphertext` was sealed under; carried alongside it since
    /// redelivery resends the same ciphertext bytes and must pair them
    /// with the nonce that originally produced them, not a fresh one.
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
    pub enqueued_at_unix_secs: u64,
    /// The sender-local friend id and delivery-tracker message id this
    /// envelope corresponds to, so redelivery can advance the right
    /// [`crate::messages::DeliveryTracker`] entry to `delivered`. Never
    /// transmitted; local bookkeeping only.
    pub friend_id: FriendId,
    pub message_id: MessageId,
    /// Present when this envelope was sealed against one of the
    /// recipient's one-time pre-keys rather than their long-term static
    /// key, per §4.12's forward-secrecy requirement for the async path.
    pub pre_key_exchange: Option<PreKeyExchange>,
}

/// The public material a recipient needs to recompute the Diffie-Hellman
/// output a pre-key envelope was sealed under: the sender's fresh
/// ephemeral public key, and which of the recipient's published pre-keys
/// it was paired with.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct PreKeyExchange {
    pub ephemeral_public: PublicKey32,
    pub pre_key_public: PublicKey32,
}

/// A single one-time pre-key published by a recipient for senders to
/// encrypt against before the recipient is reachable.
#[derive(Clone, Copy, Debug)]
pub struct PreKey {
    pub public: PublicKey32,
}

/// Capacity configuration for the store.
#[derive(Clone, Copy, Debug)]
pub struct StoreConfig {
    pub per_recipient_capacity: usize,
    pub global_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            per_recipient_capacity: 64,
            global_capacity: 1 << 16,
        }
    }
}

/// Offline-envelope storage with oldest-first eviction and per-recipient
/// pre-key pools.
pub struct AsyncStore {
    config: StoreConfig,
    envelopes: HashMap<[u8; 32], VecDeque<Envelope>>,
    total_envelopes: usize,
    pre_keys: HashMap<[u8; 32], VecDeque<PreKey>>,
}

impl AsyncStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            config,
            envelopes: HashMap::new(),
            total_envelopes: 0,
            pre_keys: HashMap::new(),
        }
    }

    /// Publish pre-keys for `recipient`, appended to its pool.
    pub fn publish_pre_keys(&mut self, recipient: PublicKey32, keys: Vec<PreKey>) {
        self.pre_keys.entry(recipient.0).or_default().extend(keys);
    }

    /// Consume one of `recipient`'s pre-keys, for a sender encrypting an
    /// async message. Errors with [`FriendError::NoPreKeys`] if none
    /// remain.
    pub fn take_pre_key(&mut self, recipient: &PublicKey32) -> Result<PreKey> {
        self.pre_keys
            .get_mut(&recipient.0)
            .and_then(|pool| pool.pop_front())
            .ok_or(FriendError::NoPreKeys)
    }

    pub fn pre_key_count(&self, recipient: &PublicKey32) -> usize {
        self.pre_keys.get(&recipient.0).map(VecDeque::len).unwrap_or(0)
    }

    /// Enqueue an envelope for `recipient`. Enforces per-recipient and
    /// global capacity, evicting the oldest envelope for that recipient to
    /// make room when the recipient's queue is full; if the global limit
    /// is reached with no local room to evict from, the store reports
    /// `Full` rather than silently dropping anyone's mail.
    pub fn enqueue(
        &mut self,
        recipient: PublicKey32,
        envelope: Envelope,
    ) -> Result<()> {
        let queue = self.envelopes.entry(recipient.0).or_default();

        if queue.len() >= self.config.per_recipient_capacity {
            queue.pop_front();
            self.total_envelopes -= 1;
        } else if self.total_envelopes >= self.config.global_capacity {
            return Err(FriendError::Full);
        }

        queue.push_back(envelope);
        self.total_envelopes += 1;
        Ok(())
    }

    /// Drain and return every envelope queued for `recipient`, e.g. when
    /// the friend table notifies that the recipient just came online.
    pub fn drain(&mut self, recipient: &PublicKey32) -> Vec<Envelope> {
        match self.envelopes.remove(&recipient.0) {
            Some(queue) => {
                self.total_envelopes -= queue.len();
                queue.into_iter().collect()
            }
            None => Vec::new(),
        }
    }

    pub fn queued_count(&self, recipient: &PublicKey32) -> usize {
        self.envelopes.get(&recipient.0).map(VecDeque::len).unwrap_or(0)
    }

    /// Fraction of global capacity currently in use, for host-facing
    /// utilization reporting.
    pub fn utilization(&self) -> f64 {
        if self.config.global_capacity == 0 {
            return 0.0;
        }
        self.total_envelopes as f64 / self.config.global_capacity as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tox_crypto::keys::generate_keypair;

    fn envelope(sender: PublicKey32) -> Envelope {
        Envelope {
            sender,
            nonce: [0u8; 24],
            ciphertext: vec![1, 2, 3],
            enqueued_at_unix_secs: 1_000_000,
            friend_id: 0,
            message_id: 0,
            pre_key_exchange: None,
        }
    }

    #[test]
    fn test_enqueue_and_drain_roundtrip() {
        let mut store = AsyncStore::new(StoreConfig::default());
        let (recipient, _) = generate_keypair();
        let (sender, _) = generate_keypair();
        store.enqueue(recipient, envelope(sender)).unwrap();
        assert_eq!(store.queued_count(&recipient), 1);

        let drained = store.drain(&recipient);
        assert_eq!(drained.len(), 1);
        assert_eq!(store.queued_count(&recipient), 0);
    }

    #[test]
    fn test_per_recipient_capacity_evicts_oldest() {
        let mut store = AsyncStore::new(StoreConfig {
            per_recipient_capacity: 2,
            global_capacity: 1000,
        });
        let (recipient, _) = generate_keypair();
        let (sender_a, _) = generate_keypair();
        let (sender_b, _) = generate_keypair();
        let (sender_c, _) = generate_keypair();

        store.enqueue(recipient, envelope(sender_a)).unwrap();
        store.enqueue(recipient, envelope(sender_b)).unwrap();
        store.enqueue(recipient, envelope(sender_c)).unwrap();

        let drained = store.drain(&recipient);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].sender, sender_b);
        assert_eq!(drained[1].sender, sender_c);
    }

    #[test]
    fn test_global_capacity_reports_full() {
        let mut store = AsyncStore::new(StoreConfig {
            per_recipient_capacity: 10,
            global_capacity: 1,
        });
        let (recipient_a, _) = generate_keypair();
        let (recipient_b, _) = generate_keypair();
        let (sender, _) = generate_keypair();

        store.enqueue(recipient_a, envelope(sender)).unwrap();
        let err = store.enqueue(recipient_b, envelope(sender)).unwrap_err();
        assert!(matches!(err, FriendError::Full));
    }

    #[test]
    fn test_pre_key_exhaustion_reports_no_pre_keys() {
        let mut store = AsyncStore::new(StoreConfig::default());
        let (recipient, _) = generate_keypair();
        let (pre_key_pub, _) = generate_keypair();
        store.publish_pre_keys(recipient, vec![PreKey { public: pre_key_pub }]);

        assert!(store.take_pre_key(&recipient).is_ok());
        let err = store.take_pre_key(&recipient).unwrap_err();
        assert!(matches!(err, FriendError::NoPreKeys));
    }

    #[test]
    fn test_utilization_reflects_total_envelopes() {
        let mut store = AsyncStore::new(StoreConfig {
            per_recipient_capacity: 10,
            global_capacity: 4,
        });
        let (recipient, _) = generate_keypair();
        let (sender, _) = generate_keypair();
        store.enqueue(recipient, envelope(sender)).unwrap();
        store.enqueue(recipient, envelope(sender)).unwrap();
        assert!((store.utilization() - 0.5).abs() < 1e-9);
    }
}
