//! Chunked file transfer: a per-transfer state machine, ordered chunk
//! bookkeeping with gap detection, an exponentially-weighted speed
//! estimate, and stall detection.
//!
//! Chunk accounting is generalized from `ochra-storage::chunker`'s
//! fixed-size chunk/index bookkeeping: where that chunker content-addresses
//! fixed 4 MB chunks into a Merkle tree, this transfer has no
//! content-addressing requirement and instead streams a sender-assigned
//! cursor of up to 65535-byte chunks.

use crate::{FriendError, Result};

/// Nominal chunk size, in bytes.
pub const NOMINAL_CHUNK_SIZE: usize = 1024;

/// Maximum chunk size, in bytes.
pub const MAX_CHUNK_SIZE: usize = 65535;

/// Smoothing factor for the exponentially-weighted transfer-speed
/// estimate.
pub const SPEED_EWMA_ALPHA: f64 = 0.3;

/// A file transfer's lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferState {
    Pending,
    Running,
    Paused,
    Done,
    Cancelled,
    Error,
}

impl TransferState {
    fn is_terminal(self) -> bool {
        matches!(self, TransferState::Done | TransferState::Cancelled | TransferState::Error)
    }
}

/// A file name, validated to contain no path-traversal components before a
/// transfer is allowed to open a destination file.
#[derive(Clone, Debug)]
pub struct SafeFileName(String);

impl SafeFileName {
    /// Reject any name containing a path separator, a `..` component, or a
    /// leading `/` (absolute path), per §4.11 "Path safety".
    pub fn parse(name: &str) -> Result<Self> {
        if name.is_empty() || name.starts_with(['/', '\\']) {
            return Err(FriendError::UnsafeFileName(name.to_string()));
        }
        let has_traversal_component = name.split(['/', '\\']).any(|component| component == "..");
        if has_traversal_component {
            return Err(FriendError::UnsafeFileName(name.to_string()));
        }
        Ok(Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A chunked file transfer, tracked by either side.
pub struct FileTransfer {
    pub state: TransferState,
    pub file_size: u64,
    pub transferred: u64,
    /// Application-defined tag for the transfer's purpose, opaque to this
    /// crate (spec open question: kept uninterpreted).
    pub kind: u8,
    /// File name, as announced by the sender. Receiver-side transfers are
    /// built from an already-sanitized [`SafeFileName`]; sender-side
    /// transfers carry whatever the host passed to `file_send`.
    pub name: String,
    speed_estimate: f64,
    last_chunk_cursor: Option<u64>,
}

impl FileTransfer {
    pub fn new(file_size: u64, kind: u8, name: String) -> Self {
        Self {
            state: TransferState::Pending,
            file_size,
            transferred: 0,
            kind,
            name,
            speed_estimate: 0.0,
            last_chunk_cursor: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        self.transition(TransferState::Pending, TransferState::Running)
    }

    pub fn pause(&mut self) -> Result<()> {
        self.transition(TransferState::Running, TransferState::Paused)
    }

    pub fn resume(&mut self) -> Result<()> {
        self.transition(TransferState::Paused, TransferState::Running)
    }

    pub fn cancel(&mut self) -> Result<()> {
        if self.state.is_terminal() {
            return Err(FriendError::BadState(self.state));
        }
        self.state = TransferState::Cancelled;
        Ok(())
    }

    fn transition(&mut self, from: TransferState, to: TransferState) -> Result<()> {
        if self.state != from {
            return Err(FriendError::BadState(self.state));
        }
        self.state = to;
        Ok(())
    }

    /// Record a chunk of `len` bytes written at `position`, updating
    /// `transferred` and the speed estimate. `elapsed_secs` is the time
    /// since the previous chunk, supplied by the caller so this stays
    /// independent of any wall clock.
    ///
    /// Returns an error if `len` exceeds [`MAX_CHUNK_SIZE`], or if the
    /// transfer isn't in a state that accepts chunks.
    pub fn record_chunk(&mut self, position: u64, len: usize, elapsed_secs: f64) -> Result<()> {
        if self.state != TransferState::Running {
            return Err(FriendError::BadState(self.state));
        }
        if len > MAX_CHUNK_SIZE {
            return Err(FriendError::ChunkTooLarge { len, max: MAX_CHUNK_SIZE });
        }

        self.transferred = self.transferred.max(position + len as u64);
        self.last_chunk_cursor = Some(position + len as u64);

        if elapsed_secs > 0.0 {
            let instantaneous = len as f64 / elapsed_secs;
            self.speed_estimate = SPEED_EWMA_ALPHA * instantaneous
                + (1.0 - SPEED_EWMA_ALPHA) * self.speed_estimate;
        }

        if self.transferred >= self.file_size {
            self.state = TransferState::Done;
        }
        Ok(())
    }

    pub fn speed_estimate_bytes_per_sec(&self) -> f64 {
        self.speed_estimate
    }

    /// Whether the next expected chunk would create a gap relative to the
    /// last chunk seen (out-of-order delivery beyond what the session
    /// layer's reorder tolerance permits is the caller's concern; this
    /// only reports whether a gap exists).
    pub fn has_gap_at(&self, position: u64) -> bool {
        match self.last_chunk_cursor {
            Some(cursor) => position > cursor,
            None => position > 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_pending_to_done() {
        let mut t = FileTransfer::new(2048, 0, "test.bin".to_string());
        t.start().unwrap();
        t.record_chunk(0, 1024, 1.0).unwrap();
        assert_eq!(t.state, TransferState::Running);
        t.record_chunk(1024, 1024, 1.0).unwrap();
        assert_eq!(t.state, TransferState::Done);
        assert_eq!(t.transferred, 2048);
    }

    #[test]
    fn test_pause_resume_roundtrip() {
        let mut t = FileTransfer::new(4096, 0, "test.bin".to_string());
        t.start().unwrap();
        t.pause().unwrap();
        assert_eq!(t.state, TransferState::Paused);
        t.resume().unwrap();
        assert_eq!(t.state, TransferState::Running);
    }

    #[test]
    fn test_illegal_transition_returns_bad_state() {
        let mut t = FileTransfer::new(4096, 0, "test.bin".to_string());
        // Can't pause before starting.
        let err = t.pause().unwrap_err();
        assert!(matches!(err, FriendError::BadState(TransferState::Pending)));
    }

    #[test]
    fn test_cancel_from_any_nonterminal_state() {
        let mut t = FileTransfer::new(4096, 0, "test.bin".to_string());
        t.cancel().unwrap();
        assert_eq!(t.state, TransferState::Cancelled);
    }

    #[test]
    fn test_cancel_after_terminal_rejected() {
        let mut t = FileTransfer::new(1024, 0, "test.bin".to_string());
        t.start().unwrap();
        t.record_chunk(0, 1024, 1.0).unwrap();
        assert_eq!(t.state, TransferState::Done);
        let err = t.cancel().unwrap_err();
        assert!(matches!(err, FriendError::BadState(TransferState::Done)));
    }

    #[test]
    fn test_chunk_exceeding_max_size_rejected() {
        let mut t = FileTransfer::new(1_000_000, 0, "test.bin".to_string());
        t.start().unwrap();
        let err = t.record_chunk(0, MAX_CHUNK_SIZE + 1, 1.0).unwrap_err();
        assert!(matches!(err, FriendError::ChunkTooLarge { .. }));
    }

    #[test]
    fn test_speed_estimate_converges_toward_steady_rate() {
        let mut t = FileTransfer::new(1_000_000, 0, "test.bin".to_string());
        t.start().unwrap();
        for _ in 0..50 {
            t.record_chunk(t.transferred, NOMINAL_CHUNK_SIZE, 1.0).unwrap();
        }
        let estimate = t.speed_estimate_bytes_per_sec();
        assert!((estimate - NOMINAL_CHUNK_SIZE as f64).abs() < 1.0);
    }

    #[test]
    fn test_gap_detection() {
        let mut t = FileTransfer::new(10_000, 0, "test.bin".to_string());
        t.start().unwrap();
        t.record_chunk(0, 1024, 1.0).unwrap();
        assert!(!t.has_gap_at(1024));
        assert!(t.has_gap_at(2048));
    }

    #[test]
    fn test_safe_file_name_rejects_traversal() {
        assert!(SafeFileName::parse("../../etc/passwd").is_err());
        assert!(SafeFileName::parse("/etc/passwd").is_err());
        assert!(SafeFileName::parse("a/../b").is_err());
    }

    #[test]
    fn test_safe_file_name_accepts_plain_name() {
        let name = SafeFileName::parse("photo.jpg").expect("plain name ok");
        assert_eq!(name.as_str(), "photo.jpg");
    }
}
