//! # tox-session
//!
//! Session and protocol negotiation: the legacy per-message box, the
//! Noise-IK mutually-authenticated handshake, the per-peer session store
//! with replay protection, and the version-commitment exchange that
//! defends the negotiation against downgrade attacks.
//!
//! ## Modules
//!
//! - [`version`] — version negotiation and the post-handshake commitment
//! - [`handshake`] — the Noise-IK state machine
//! - [`legacy`] — the per-message box fallback used when a peer has no
//!   Noise-IK support
//! - [`store`] — per-peer session records and the replay window

pub mod handshake;
pub mod legacy;
pub mod store;
pub mod version;

/// Protocol version identifiers negotiated between peers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum Version {
    Legacy,
    NoiseIk,
}

/// Error types for session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A transport-encrypted send or receive was attempted before the
    /// handshake reached `complete`.
    #[error("handshake incomplete")]
    HandshakeIncomplete,

    /// The handshake message arrived in a state that cannot accept it.
    #[error("handshake message out of order for state {0:?}")]
    OutOfOrder(handshake::HandshakeState),

    /// The two parties have no protocol version in common.
    #[error("version mismatch: no common supported version")]
    VersionMismatch,

    /// A peer's version commitment MAC did not verify.
    #[error("invalid version commitment MAC")]
    InvalidMac,

    /// A version commitment's timestamp is older than the maximum age.
    #[error("version commitment too old")]
    CommitmentTooOld,

    /// A version commitment's timestamp is further in the future than the
    /// allowed forward drift.
    #[error("version commitment from the future")]
    CommitmentFromFuture,

    /// The commitment named a version the local side did not believe it
    /// negotiated.
    #[error("commitment names unexpected version")]
    CommitmentVersionMismatch,

    /// A received counter fell outside the replay window.
    #[error("replayed or too-old message counter")]
    ReplayDetected,

    /// The underlying AEAD rejected the message.
    #[error("crypto error: {0}")]
    Crypto(#[from] tox_crypto::CryptoError),

    /// No session exists for this peer.
    #[error("no session for peer")]
    NoSession,
}

/// Convenience result type for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
