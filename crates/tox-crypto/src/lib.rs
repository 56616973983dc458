//! # tox-crypto
//!
//! Cryptographic primitives for the Tox protocol core.
//!
//! This crate implements the long-term identity keypair, the authenticated
//! box construction used by both the legacy per-message encryption and the
//! Noise-IK transport keys, nonce/nospam generation, and the Tox ID codec.
//!
//! ## Modules
//!
//! - [`keys`] — long-term X25519 keypairs, ephemeral key agreement
//! - [`aead`] — authenticated encryption (ChaCha20-Poly1305 over an
//!   X25519-derived key, replacing the historical XSalsa20-Poly1305 box)
//! - [`nonce`] — 24-byte nonce and 4-byte nospam generation
//! - [`toxid`] — Tox ID (38-byte) encode/decode with checksum validation

pub mod aead;
pub mod blake3;
pub mod keys;
pub mod nonce;
pub mod toxid;

/// Error types for cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AEAD encryption or decryption failed (authentication tag mismatch,
    /// or empty input where non-empty is required).
    #[error("authenticated encryption failed")]
    AuthFailed,

    /// An input buffer had the wrong length for the operation.
    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    /// A plaintext or ciphertext input was empty where non-empty is
    /// required by the contract in spec section 4.1.
    #[error("empty input not permitted")]
    EmptyInput,
}

/// Convenience result type for cryptographic operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
