//! Per-peer session records: handshake results, transport keys, the
//! monotonic send counter, and the sliding-window replay filter applied to
//! incoming counters.

use tox_crypto::keys::PublicKey32;

use crate::handshake::HandshakeState;
use crate::{Result, SessionError, Version};

/// Width, in counter values, of the replay window. A receive counter more
/// than this far behind the highest seen counter is rejected outright.
pub const REPLAY_WINDOW_WIDTH: u64 = 64;

/// Tracks which counters within the current window have already been
/// accepted, rejecting replays and counters that have fallen out of the
/// window entirely.
#[derive(Debug, Default)]
pub struct ReplayWindow {
    highest: Option<u64>,
    // Bit `i` set means `highest - i` has been seen, for i in
    // 0..REPLAY_WINDOW_WIDTH. Bit 0 always corresponds to `highest` itself.
    seen: u64,
}

impl ReplayWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `counter` if it hasn't been seen and isn't older than the
    /// window allows, recording it as seen. Rejects with
    /// [`SessionError::ReplayDetected`] otherwise.
    pub fn accept(&mut self, counter: u64) -> Result<()> {
        let highest = match self.highest {
            None => {
                self.highest = Some(counter);
                self.seen = 1;
                return Ok(());
            }
            Some(h) => h,
        };

        if counter > highest {
            let shift = counter - highest;
            self.seen = if shift >= REPLAY_WINDOW_WIDTH {
                0
            } else {
                self.seen << shift
            };
            self.seen |= 1;
            self.highest = Some(counter);
            return Ok(());
        }

        let back = highest - counter;
        if back >= REPLAY_WINDOW_WIDTH {
            return Err(SessionError::ReplayDetected);
        }
        let bit = 1u64 << back;
        if self.seen & bit != 0 {
            return Err(SessionError::ReplayDetected);
        }
        self.seen |= bit;
        Ok(())
    }
}

/// A fully- or partially-established session with one peer.
pub struct Session {
    pub peer_static_public: PublicKey32,
    pub role: crate::handshake::Role,
    pub handshake_state: HandshakeState,
    pub version: Option<Version>,
    pub send_key: Option<[u8; 32]>,
    pub recv_key: Option<[u8; 32]>,
    pub handshake_hash: Option<[u8; 32]>,
    send_counter: u64,
    replay_window: ReplayWindow,
}

impl Session {
    /// A freshly-started session for `peer_static_public`, before any
    /// handshake messages have been exchanged.
    pub fn new(peer_static_public: PublicKey32, role: crate::handshake::Role) -> Self {
        Self {
            peer_static_public,
            role,
            handshake_state: HandshakeState::Uninit,
            version: None,
            send_key: None,
            recv_key: None,
            handshake_hash: None,
            send_counter: 0,
            replay_window: ReplayWindow::new(),
        }
    }

    /// Install the output of a completed handshake and the negotiated
    /// version.
    pub fn complete(&mut self, output: &crate::handshake::HandshakeOutput, version: Version) {
        self.handshake_state = HandshakeState::Complete;
        self.version = Some(version);
        self.send_key = Some(output.send_key);
        self.recv_key = Some(output.recv_key);
        self.handshake_hash = Some(output.handshake_hash);
    }

    pub fn is_established(&self) -> bool {
        self.handshake_state == HandshakeState::Complete
    }

    /// Allocate the next send counter. Counters start at zero and never
    /// repeat for the lifetime of a session.
    pub fn next_send_counter(&mut self) -> u64 {
        let c = self.send_counter;
        self.send_counter += 1;
        c
    }

    /// Accept an inbound counter, rejecting replays and counters that have
    /// fallen outside the replay window.
    pub fn accept_recv_counter(&mut self, counter: u64) -> Result<()> {
        self.replay_window.accept(counter)
    }

    pub fn send_key(&self) -> Result<&[u8; 32]> {
        self.send_key.as_ref().ok_or(SessionError::HandshakeIncomplete)
    }

    pub fn recv_key(&self) -> Result<&[u8; 32]> {
        self.recv_key.as_ref().ok_or(SessionError::HandshakeIncomplete)
    }
}

/// Keyed storage of one [`Session`] per peer public key.
#[derive(Default)]
pub struct SessionStore {
    sessions: std::collections::HashMap<[u8; 32], Session>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: Session) {
        self.sessions.insert(session.peer_static_public.0, session);
    }

    pub fn get(&self, peer: &PublicKey32) -> Option<&Session> {
        self.sessions.get(&peer.0)
    }

    pub fn get_mut(&mut self, peer: &PublicKey32) -> Option<&mut Session> {
        self.sessions.get_mut(&peer.0)
    }

    pub fn remove(&mut self, peer: &PublicKey32) -> Option<Session> {
        self.sessions.remove(&peer.0)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_window_accepts_monotonic_counters() {
        let mut w = ReplayWindow::new();
        for i in 0..10 {
            assert!(w.accept(i).is_ok());
        }
    }

    #[test]
    fn test_replay_window_rejects_exact_replay() {
        let mut w = ReplayWindow::new();
        w.accept(5).unwrap();
        assert!(matches!(w.accept(5), Err(SessionError::ReplayDetected)));
    }

    #[test]
    fn test_replay_window_accepts_reordered_within_width() {
        let mut w = ReplayWindow::new();
        w.accept(10).unwrap();
        assert!(w.accept(3).is_ok());
        // Replaying the reordered one should still fail.
        assert!(matches!(w.accept(3), Err(SessionError::ReplayDetected)));
    }

    #[test]
    fn test_replay_window_rejects_too_old() {
        let mut w = ReplayWindow::new();
        w.accept(1000).unwrap();
        let err = w.accept(1000 - REPLAY_WINDOW_WIDTH).unwrap_err();
        assert!(matches!(err, SessionError::ReplayDetected));
    }

    #[test]
    fn test_replay_window_slides_forward() {
        let mut w = ReplayWindow::new();
        w.accept(0).unwrap();
        w.accept(1000).unwrap();
        // 0 is now far outside the window relative to the new highest.
        assert!(matches!(w.accept(0), Err(SessionError::ReplayDetected)));
        // But something close to the new highest is still fine.
        assert!(w.accept(999).is_ok());
    }

    #[test]
    fn test_send_counter_is_monotonic_and_unique() {
        let (peer_pub, _) = tox_crypto::keys::generate_keypair();
        let mut session = Session::new(peer_pub, crate::handshake::Role::Initiator);
        let a = session.next_send_counter();
        let b = session.next_send_counter();
        let c = session.next_send_counter();
        assert_eq!((a, b, c), (0, 1, 2));
    }

    #[test]
    fn test_session_store_insert_get_remove() {
        let (peer_pub, _) = tox_crypto::keys::generate_keypair();
        let mut store = SessionStore::new();
        store.insert(Session::new(peer_pub, crate::handshake::Role::Initiator));
        assert!(store.get(&peer_pub).is_some());
        assert_eq!(store.len(), 1);
        assert!(store.remove(&peer_pub).is_some());
        assert!(store.get(&peer_pub).is_none());
    }

    #[test]
    fn test_session_uses_send_recv_keys_before_complete_errors() {
        let (peer_pub, _) = tox_crypto::keys::generate_keypair();
        let session = Session::new(peer_pub, crate::handshake::Role::Initiator);
        assert!(matches!(
            session.send_key(),
            Err(SessionError::HandshakeIncomplete)
        ));
    }
}
