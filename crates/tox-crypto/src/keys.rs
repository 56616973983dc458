//! Curve25519 long-term identity keys and Diffie-Hellman key agreement.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

/// Number of bytes in a public key.
pub const PUBLIC_KEY_BYTES: usize = 32;

/// Number of bytes in a secret key.
pub const SECRET_KEY_BYTES: usize = 32;

/// A long-term public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey32(pub [u8; PUBLIC_KEY_BYTES]);

/// A long-term secret key. Zeroized on drop.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SecretKey32(pub [u8; SECRET_KEY_BYTES]);

/// A Diffie-Hellman shared secret. Zeroized on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret(pub [u8; 32]);

impl PublicKey32 {
    /// View the public key as a byte slice.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.0
    }
}

impl std::fmt::Debug for SecretKey32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey32(..)")
    }
}

/// Generate a new random long-term keypair, uniform over Curve25519.
pub fn generate_keypair() -> (PublicKey32, SecretKey32) {
    let secret = StaticSecret::random_from_rng(OsRng);
    let public = PublicKey::from(&secret);
    (PublicKey32(public.to_bytes()), SecretKey32(secret.to_bytes()))
}

/// Derive the public key corresponding to a secret key.
pub fn public_key_for(secret: &SecretKey32) -> PublicKey32 {
    let sk = StaticSecret::from(secret.0);
    PublicKey32(PublicKey::from(&sk).to_bytes())
}

/// Perform X25519 Diffie-Hellman key agreement between a local secret key
/// and a peer's public key.
pub fn diffie_hellman(secret: &SecretKey32, peer_public: &PublicKey32) -> SharedSecret {
    let sk = StaticSecret::from(secret.0);
    let pk = PublicKey::from(peer_public.0);
    let shared = sk.diffie_hellman(&pk);
    SharedSecret(*shared.as_bytes())
}
