//! The local pool of one-time pre-keys this instance has generated and
//! published to friends, so an async message sent to this instance while
//! offline can be encrypted under a fresh Diffie-Hellman output instead of
//! the long-term static key.
//!
//! This is the counterpart to [`crate::async_store::AsyncStore`]'s
//! `pre_keys` map: the async store holds the *public* halves a peer has
//! published to *us* (so we can take one when sending them an async
//! message); this pool holds the *secret* halves of the pre-keys *we*
//! generated and published to them (so we can recover the message once it
//! arrives).

use std::collections::HashMap;

use tox_crypto::keys::{self, PublicKey32, SecretKey32};

/// A batch of this many pre-keys is generated and published each time a
/// handshake completes with a given peer, replenishing whatever the peer
/// has already consumed.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Secret halves of pre-keys this instance has published, indexed by the
/// public half a sender would reference.
#[derive(Default)]
pub struct PreKeyPool {
    secrets: HashMap<[u8; 32], SecretKey32>,
}

impl PreKeyPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate `count` fresh one-time keypairs, retaining the secrets and
    /// returning the public halves to publish to a peer.
    pub fn generate_batch(&mut self, count: usize) -> Vec<PublicKey32> {
        let mut published = Vec::with_capacity(count);
        for _ in 0..count {
            let (public, secret) = keys::generate_keypair();
            self.secrets.insert(public.0, secret);
            published.push(public);
        }
        published
    }

    /// Recover and remove the secret half of a previously published
    /// pre-key, as consumed by an inbound envelope. One-time: a second
    /// envelope referencing the same pre-key cannot be decrypted this way
    /// again, which is the point of forward secrecy here.
    pub fn take_secret(&mut self, public: &PublicKey32) -> Option<SecretKey32> {
        self.secrets.remove(&public.0)
    }

    pub fn len(&self) -> usize {
        self.secrets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }
}
