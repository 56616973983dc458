//! # tox-friend
//!
//! Everything above a raw session: the friend table, the friend-request
//! engine, the real-time/async message pipeline, chunked file transfer,
//! and the async (offline) message store every node also serves.
//!
//! ## Modules
//!
//! - [`table`] — friend lifecycle and connection status
//! - [`requests`] — outbound/inbound friend-request delivery and retry
//! - [`messages`] — send/receive pipeline and delivery-state tracking
//! - [`files`] — chunked file-transfer state machine
//! - [`async_store`] — offline envelope storage and pre-key exchange
//! - [`prekey`] — the local pool of one-time pre-keys this instance has
//!   published to friends

pub mod async_store;
pub mod files;
pub mod messages;
pub mod prekey;
pub mod requests;
pub mod table;

/// A dense, reused friend-table slot identifier.
pub type FriendId = u32;

/// Error types for friend-table, messaging, and file-transfer operations.
#[derive(Debug, thiserror::Error)]
pub enum FriendError {
    /// The public key is already on the friend list.
    #[error("already friends with this public key")]
    AlreadyFriend,

    /// No friend exists at this id.
    #[error("no friend with id {0}")]
    NoSuchFriend(FriendId),

    /// A message failed Tox-ID checksum or length validation.
    #[error("invalid tox id: {0}")]
    InvalidToxId(#[from] tox_crypto::toxid::ToxIdError),

    /// A message body was empty or exceeded the 1372-byte limit.
    #[error("message must be 1..=1372 utf-8 bytes, got {0}")]
    InvalidMessageLength(usize),

    /// The friend is offline and no async-store path is available.
    #[error("friend not connected (async unavailable: {async_unavailable})")]
    FriendNotConnected { async_unavailable: bool },

    /// The async store has no spare capacity for this recipient (or
    /// globally).
    #[error("async store full")]
    Full,

    /// The recipient has no unused pre-keys available.
    #[error("no pre-keys available for recipient")]
    NoPreKeys,

    /// A file-transfer control operation was attempted from a state that
    /// doesn't allow it.
    #[error("illegal file-transfer state transition from {0:?}")]
    BadState(files::TransferState),

    /// An inbound file name contained a path-traversal component.
    #[error("unsafe file name: {0}")]
    UnsafeFileName(String),

    /// A chunk exceeded the wire-level maximum chunk size.
    #[error("chunk too large: {len} bytes, max {max}")]
    ChunkTooLarge { len: usize, max: usize },

    /// Underlying session-layer error.
    #[error("session error: {0}")]
    Session(#[from] tox_session::SessionError),

    /// Underlying crypto-layer error.
    #[error("crypto error: {0}")]
    Crypto(#[from] tox_crypto::CryptoError),
}

/// Convenience result type for friend-layer operations.
pub type Result<T> = std::result::Result<T, FriendError>;
