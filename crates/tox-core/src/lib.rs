//! # tox-core
//!
//! The top-level Tox driver: a host application constructs a [`Tox`]
//! instance from [`options::ToxOptions`], drives it with [`Tox::iterate`] at
//! [`Tox::iteration_interval`], and registers callbacks for inbound events.
//! Below this surface, the crate composes the friend, session, DHT, and
//! transport layers built in the sibling crates.
//!
//! ## Modules
//!
//! - [`options`] — host-configurable options, modeled on the nested
//!   config-section shape the rest of this repo's corpus uses for daemon
//!   configuration
//! - [`callbacks`] — the registry of host-supplied event callbacks, fired
//!   synchronously and without reentrancy from `iterate`
//! - [`save`] — the versioned save/load snapshot codec
//! - [`network`] — glue between the DHT/friend-request engines and a real
//!   [`tox_transport::UdpTransport`]
//! - [`tox`] — the [`Tox`] driver itself

pub mod callbacks;
pub mod network;
pub mod options;
pub mod save;
pub mod tox;

pub use tox::Tox;

/// The host-facing error taxonomy (spec section 6's exit-code list).
///
/// Every public method on [`Tox`] returns one of these rather than a
/// lower-layer crate's error type directly, so a host never needs to know
/// which internal crate produced a failure.
#[derive(Debug, thiserror::Error)]
pub enum ToxError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("not connected (async unavailable: {async_unavailable})")]
    NotConnected { async_unavailable: bool },

    #[error("operation not permitted after kill")]
    NotPermitted,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<tox_crypto::toxid::ToxIdError> for ToxError {
    fn from(err: tox_crypto::toxid::ToxIdError) -> Self {
        ToxError::InvalidArgument(err.to_string())
    }
}

impl From<tox_crypto::CryptoError> for ToxError {
    fn from(err: tox_crypto::CryptoError) -> Self {
        ToxError::AuthFailed(err.to_string())
    }
}

impl From<tox_dht::DhtError> for ToxError {
    fn from(err: tox_dht::DhtError) -> Self {
        match err {
            tox_dht::DhtError::BootstrapFailed { .. } => ToxError::TimedOut(err.to_string()),
            tox_dht::DhtError::AlreadyInProgress => ToxError::Internal(err.to_string()),
            tox_dht::DhtError::BucketFull => ToxError::ResourceExhausted(err.to_string()),
            tox_dht::DhtError::Network(_) => ToxError::Internal(err.to_string()),
        }
    }
}

impl From<tox_session::SessionError> for ToxError {
    fn from(err: tox_session::SessionError) -> Self {
        use tox_session::SessionError::*;
        match err {
            HandshakeIncomplete | OutOfOrder(_) | NoSession => ToxError::Protocol(err.to_string()),
            VersionMismatch | CommitmentVersionMismatch => ToxError::Protocol(err.to_string()),
            InvalidMac | CommitmentTooOld | CommitmentFromFuture | ReplayDetected => {
                ToxError::AuthFailed(err.to_string())
            }
            Crypto(_) => ToxError::AuthFailed(err.to_string()),
        }
    }
}

impl From<tox_friend::FriendError> for ToxError {
    fn from(err: tox_friend::FriendError) -> Self {
        use tox_friend::FriendError::*;
        match err {
            AlreadyFriend => ToxError::AlreadyExists,
            NoSuchFriend(_) => ToxError::NotFound,
            InvalidToxId(_) | InvalidMessageLength(_) | UnsafeFileName(_) | ChunkTooLarge { .. } => {
                ToxError::InvalidArgument(err.to_string())
            }
            FriendNotConnected { async_unavailable } => ToxError::NotConnected { async_unavailable },
            Full | NoPreKeys => ToxError::ResourceExhausted(err.to_string()),
            BadState(_) => ToxError::InvalidArgument(err.to_string()),
            Session(inner) => return inner.into(),
            Crypto(inner) => return inner.into(),
        }
    }
}

/// Convenience result type for `tox-core` operations.
pub type Result<T> = std::result::Result<T, ToxError>;
