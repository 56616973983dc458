//! Authenticated encryption for the legacy per-message box and the Noise-IK
//! transport keys.
//!
//! The historical Tox wire format uses a Curve25519-XSalsa20-Poly1305 box.
//! This implementation keeps the Curve25519 key agreement but uses
//! ChaCha20-Poly1305 as the AEAD primitive, deriving the symmetric key from
//! the X25519 shared secret with a domain-separated BLAKE3 KDF instead of
//! using the raw DH output directly. See DESIGN.md for the rationale.

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};

use crate::blake3::contexts;
use crate::keys::{PublicKey32, SecretKey32, SharedSecret};
use crate::{blake3, keys, CryptoError, Result};

/// ChaCha20-Poly1305 nonce size in bytes.
pub const AEAD_NONCE_BYTES: usize = 12;

/// Authentication tag size in bytes.
pub const TAG_BYTES: usize = 16;

fn box_key(shared: &SharedSecret) -> [u8; 32] {
    blake3::derive_key(contexts::LEGACY_BOX_KEY, &shared.0)
}

/// Derive the symmetric encryption key shared between `self_secret` and
/// `peer_public`.
fn shared_key(peer_public: &PublicKey32, self_secret: &SecretKey32) -> [u8; 32] {
    let shared = keys::diffie_hellman(self_secret, peer_public);
    box_key(&shared)
}

/// Derive the symmetric key for a pre-key async envelope: the Diffie-Hellman
/// output between a sender's fresh ephemeral secret and a recipient's
/// one-time pre-key public half, under a context distinct from the
/// long-term-key box so a compromised async-path key can never be confused
/// with (or used to recover) a long-term-key session.
pub fn prekey_shared_key(ephemeral_secret: &SecretKey32, pre_key_public: &PublicKey32) -> [u8; 32] {
    let shared = keys::diffie_hellman(ephemeral_secret, pre_key_public);
    blake3::derive_key(contexts::PREKEY_BOX_KEY, &shared.0)
}

/// Truncate a 24-byte legacy nonce down to the 12 bytes ChaCha20-Poly1305
/// expects, by hashing it with BLAKE3 and taking the first 12 bytes. This
/// keeps the wire-visible nonce at its historical 24-byte width while still
/// feeding a correctly-sized nonce to the AEAD.
fn aead_nonce(nonce24: &[u8; 24]) -> [u8; AEAD_NONCE_BYTES] {
    let digest = blake3::hash(nonce24);
    let mut out = [0u8; AEAD_NONCE_BYTES];
    out.copy_from_slice(&digest[..AEAD_NONCE_BYTES]);
    out
}

/// Encrypt `plaintext` for `peer_public` using `self_secret`, authenticated
/// under `nonce`. Fails only if `plaintext` is empty.
pub fn encrypt(
    plaintext: &[u8],
    nonce: &[u8; 24],
    peer_public: &PublicKey32,
    self_secret: &SecretKey32,
) -> Result<Vec<u8>> {
    if plaintext.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    let key = shared_key(peer_public, self_secret);
    encrypt_with_key(&key, nonce, plaintext)
}

/// Decrypt `ciphertext` sent by `peer_public` to `self_secret`, authenticated
/// under `nonce`. Fails with [`CryptoError::AuthFailed`] on any tampering.
pub fn decrypt(
    ciphertext: &[u8],
    nonce: &[u8; 24],
    peer_public: &PublicKey32,
    self_secret: &SecretKey32,
) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Err(CryptoError::EmptyInput);
    }
    let key = shared_key(peer_public, self_secret);
    decrypt_with_key(&key, nonce, ciphertext)
}

/// Encrypt with an already-derived 32-byte key (used by the session layer
/// once a Noise-IK handshake has produced send/recv keys).
pub fn encrypt_with_key(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce12 = aead_nonce(nonce);
    cipher
        .encrypt(
            Nonce::from_slice(&nonce12),
            Payload {
                msg: plaintext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::AuthFailed)
}

/// Decrypt with an already-derived 32-byte key.
pub fn decrypt_with_key(key: &[u8; 32], nonce: &[u8; 24], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
    let nonce12 = aead_nonce(nonce);
    cipher
        .decrypt(
            Nonce::from_slice(&nonce12),
            Payload {
                msg: ciphertext,
                aad: &[],
            },
        )
        .map_err(|_| CryptoError::AuthFailed)
}
