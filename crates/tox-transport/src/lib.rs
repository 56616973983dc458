//! # tox-transport
//!
//! UDP framing, handler dispatch, NAT traversal, and the shared
//! retry/backoff helper used by the bootstrap manager and the
//! friend-request engine.
//!
//! ## Modules
//!
//! - [`socket`] — UDP bind/send/receive, per-type handler registry
//! - [`nat`] — NAT classification and hole-punch coordination
//! - [`retry`] — exponential backoff with jitter
//! - [`clock`] — injectable time provider for deterministic tests

pub mod clock;
pub mod nat;
pub mod retry;
pub mod socket;

pub use clock::{Clock, SharedClock, SystemClock, VirtualClock};
pub use socket::{Handler, UdpTransport};

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No free port was available in the configured bind range.
    #[error("no free port in range {start}..={end}")]
    PortRangeExhausted { start: u16, end: u16 },

    /// An I/O error occurred on the underlying socket.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The transport has already been closed.
    #[error("transport is closed")]
    Closed,
}

/// Convenience result type for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;
