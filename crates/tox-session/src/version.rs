//! Version negotiation and the post-handshake version-commitment exchange.
//!
//! The handshake itself says nothing about which protocol version was
//! negotiated — an active attacker relaying packets between a Noise-IK
//! capable pair could otherwise strip the advertisement and force both
//! sides down to the legacy box. To close that gap, each side commits to
//! the version it believes it negotiated by MACing it (and a timestamp)
//! under a key derived from the handshake transcript hash, and rejects
//! its peer's commitment if it names a different version.

use serde::{Deserialize, Serialize};

use tox_crypto::blake3::{self, contexts};
use tox_transport::SharedClock;

use crate::{Result, SessionError, Version};

/// Maximum age, in seconds, a version commitment's timestamp may have.
pub const MAX_COMMITMENT_AGE_SECS: u64 = 5 * 60;

/// Maximum allowed forward clock drift, in seconds, for a commitment
/// timestamp claiming to be from the future.
pub const MAX_FORWARD_DRIFT_SECS: u64 = 60;

/// The set of protocol versions and cipher suites a side is willing to
/// speak, advertised before a handshake begins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionAdvertisement {
    pub supported_versions: Vec<Version>,
}

impl VersionAdvertisement {
    /// The advertisement of a peer that speaks every version this build
    /// knows about, highest-preferred last.
    pub fn all() -> Self {
        Self {
            supported_versions: vec![Version::Legacy, Version::NoiseIk],
        }
    }

    /// The advertisement of a peer that only speaks the legacy box.
    pub fn legacy_only() -> Self {
        Self {
            supported_versions: vec![Version::Legacy],
        }
    }

    /// Pick the highest version both sides support. `None` if there is no
    /// overlap at all.
    pub fn negotiate(&self, peer: &VersionAdvertisement) -> Option<Version> {
        self.supported_versions
            .iter()
            .filter(|v| peer.supported_versions.contains(v))
            .max()
            .copied()
    }
}

/// A signed statement, exchanged after the handshake completes, of which
/// version a side believes was negotiated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VersionCommitment {
    pub version: Version,
    pub timestamp: u64,
    pub mac: [u8; 32],
}

/// Derive the commitment MAC key from a completed handshake's transcript
/// hash.
fn commitment_key(handshake_hash: &[u8; 32]) -> [u8; 32] {
    blake3::derive_key(contexts::VERSION_COMMITMENT_KEY, handshake_hash)
}

fn commitment_message(version: Version, timestamp: u64) -> Vec<u8> {
    blake3::encode_multi_field(&[
        &(version as u8).to_le_bytes(),
        &timestamp.to_le_bytes(),
    ])
}

/// Produce a commitment binding `version` to the current time, under a key
/// derived from `handshake_hash`.
pub fn commit(handshake_hash: &[u8; 32], version: Version, clock: &SharedClock) -> VersionCommitment {
    let timestamp = clock.now_unix_secs();
    let key = commitment_key(handshake_hash);
    let mac = blake3::keyed_hash(&key, &commitment_message(version, timestamp));
    VersionCommitment {
        version,
        timestamp,
        mac,
    }
}

/// Verify a peer's commitment against the locally negotiated version,
/// rejecting stale, future-dated, mismatched, or forged commitments.
pub fn verify(
    commitment: &VersionCommitment,
    expected_version: Version,
    handshake_hash: &[u8; 32],
    clock: &SharedClock,
) -> Result<()> {
    let key = commitment_key(handshake_hash);
    let expected_mac = blake3::keyed_hash(
        &key,
        &commitment_message(commitment.version, commitment.timestamp),
    );
    if expected_mac != commitment.mac {
        return Err(SessionError::InvalidMac);
    }

    if commitment.version != expected_version {
        return Err(SessionError::CommitmentVersionMismatch);
    }

    let now = clock.now_unix_secs();
    if commitment.timestamp + MAX_COMMITMENT_AGE_SECS < now {
        return Err(SessionError::CommitmentTooOld);
    }
    if commitment.timestamp > now + MAX_FORWARD_DRIFT_SECS {
        return Err(SessionError::CommitmentFromFuture);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tox_transport::VirtualClock;

    fn clock_at(secs: u64) -> SharedClock {
        Arc::new(VirtualClock::at(secs))
    }

    #[test]
    fn test_negotiate_prefers_highest_common_version() {
        let mine = VersionAdvertisement::all();
        let peer = VersionAdvertisement::all();
        assert_eq!(mine.negotiate(&peer), Some(Version::NoiseIk));
    }

    #[test]
    fn test_negotiate_falls_back_to_legacy() {
        let mine = VersionAdvertisement::all();
        let peer = VersionAdvertisement::legacy_only();
        assert_eq!(mine.negotiate(&peer), Some(Version::Legacy));
    }

    #[test]
    fn test_negotiate_no_overlap() {
        let mine = VersionAdvertisement {
            supported_versions: vec![Version::NoiseIk],
        };
        let peer = VersionAdvertisement::legacy_only();
        assert_eq!(mine.negotiate(&peer), None);
    }

    #[test]
    fn test_commit_and_verify_roundtrip() {
        let hash = [7u8; 32];
        let clock = clock_at(1_000_000);
        let commitment = commit(&hash, Version::NoiseIk, &clock);
        assert!(verify(&commitment, Version::NoiseIk, &hash, &clock).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_mac() {
        let hash = [7u8; 32];
        let clock = clock_at(1_000_000);
        let mut commitment = commit(&hash, Version::NoiseIk, &clock);
        commitment.mac[0] ^= 0xFF;
        assert!(matches!(
            verify(&commitment, Version::NoiseIk, &hash, &clock),
            Err(SessionError::InvalidMac)
        ));
    }

    #[test]
    fn test_verify_rejects_downgrade() {
        // An attacker relays the initiator's handshake but claims the
        // committed version was legacy, not the actually-negotiated
        // NoiseIk.
        let hash = [7u8; 32];
        let clock = clock_at(1_000_000);
        let commitment = commit(&hash, Version::Legacy, &clock);
        assert!(matches!(
            verify(&commitment, Version::NoiseIk, &hash, &clock),
            Err(SessionError::CommitmentVersionMismatch)
        ));
    }

    #[test]
    fn test_verify_rejects_stale_commitment() {
        let hash = [7u8; 32];
        let clock = clock_at(1_000_000);
        let commitment = commit(&hash, Version::NoiseIk, &clock);
        let later = clock_at(1_000_000 + MAX_COMMITMENT_AGE_SECS + 1);
        assert!(matches!(
            verify(&commitment, Version::NoiseIk, &hash, &later),
            Err(SessionError::CommitmentTooOld)
        ));
    }

    #[test]
    fn test_verify_rejects_future_commitment() {
        let hash = [7u8; 32];
        let clock = clock_at(1_000_000);
        let mut commitment = commit(&hash, Version::NoiseIk, &clock);
        // Forge a timestamp far in the future; the MAC must cover it so
        // this also exercises MAC verification, not just the drift check.
        commitment.timestamp += MAX_FORWARD_DRIFT_SECS + 100;
        let key = commitment_key(&hash);
        commitment.mac = blake3::keyed_hash(
            &key,
            &commitment_message(commitment.version, commitment.timestamp),
        );
        assert!(matches!(
            verify(&commitment, Version::NoiseIk, &hash, &clock),
            Err(SessionError::CommitmentFromFuture)
        ));
    }
}
