//! Versioned save/load snapshot.
//!
//! Serialized with `serde` + `ciborium`, the same wire-serialization stack
//! this codebase uses elsewhere. The envelope carries an explicit
//! `version` and an `extra` bucket for fields this build doesn't
//! understand, so round-tripping through an older or newer build preserves
//! whatever it didn't touch rather than silently dropping it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use tox_crypto::keys::{generate_keypair, public_key_for, PublicKey32, SecretKey32};
use tox_crypto::nonce::{generate_nospam, is_invalid_nospam, NOSPAM_BYTES};
use tox_friend::table::{Friend, PresenceStatus};

use crate::{Result, ToxError};

/// Current save-format version. Bump when a field's meaning changes in a
/// way that isn't forward-compatible with the `extra` bucket alone.
pub const SAVE_VERSION: u32 = 1;

/// One friend's durable state. Distinct from [`tox_friend::table::Friend`]:
/// this omits `connection_status` (runtime-only) and `user_data` (never
/// serialized, per spec).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SavedFriend {
    pub public_key: [u8; 32],
    pub name: String,
    pub status_msg: String,
    pub presence: u8,
    pub last_seen: u64,
}

fn presence_to_u8(p: PresenceStatus) -> u8 {
    match p {
        PresenceStatus::None => 0,
        PresenceStatus::Away => 1,
        PresenceStatus::Busy => 2,
        PresenceStatus::Online => 3,
    }
}

pub(crate) fn presence_from_u8(b: u8) -> PresenceStatus {
    match b {
        1 => PresenceStatus::Away,
        2 => PresenceStatus::Busy,
        3 => PresenceStatus::Online,
        _ => PresenceStatus::None,
    }
}

impl From<&Friend> for SavedFriend {
    fn from(friend: &Friend) -> Self {
        Self {
            public_key: friend.public_key.0,
            name: friend.name.clone(),
            status_msg: friend.status_msg.clone(),
            presence: presence_to_u8(friend.presence),
            last_seen: friend.last_seen,
        }
    }
}

/// The full versioned save blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveData {
    pub version: u32,
    pub secret_key: [u8; 32],
    /// Missing or all-zero on load is treated as "no nospam saved"; the
    /// caller regenerates one rather than adopting an invalid value.
    pub nospam: Option<[u8; NOSPAM_BYTES]>,
    pub self_name: String,
    pub self_status_msg: String,
    pub friends: Vec<SavedFriend>,
    /// Fields this build doesn't recognize, preserved verbatim across a
    /// load-then-save round trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, ciborium::value::Value>,
}

impl SaveData {
    pub fn new(secret_key: SecretKey32, nospam: [u8; NOSPAM_BYTES]) -> Self {
        Self {
            version: SAVE_VERSION,
            secret_key: secret_key.0,
            nospam: Some(nospam),
            self_name: String::new(),
            self_status_msg: String::new(),
            friends: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// The public key corresponding to this snapshot's secret key.
    pub fn public_key(&self) -> PublicKey32 {
        public_key_for(&SecretKey32(self.secret_key))
    }

    /// The nospam value to adopt: the saved one if present and valid,
    /// otherwise a freshly generated one (spec: "a missing nospam field
    /// implies freshly generate one on load; do not leave zeros").
    pub fn effective_nospam(&self) -> [u8; NOSPAM_BYTES] {
        match self.nospam {
            Some(n) if !is_invalid_nospam(&n) => n,
            _ => generate_nospam(),
        }
    }
}

/// Serialize a snapshot into its on-disk bytes.
pub fn encode(data: &SaveData) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(data, &mut buf)
        .map_err(|err| ToxError::Internal(format!("save encode failed: {err}")))?;
    Ok(buf)
}

/// Parse a snapshot from its on-disk bytes.
pub fn decode(bytes: &[u8]) -> Result<SaveData> {
    ciborium::from_reader(bytes)
        .map_err(|err| ToxError::InvalidArgument(format!("save decode failed: {err}")))
}

/// A fresh, never-before-saved identity, for `Tox::new` with no save data.
pub fn fresh() -> SaveData {
    let (_, secret_key) = generate_keypair();
    SaveData::new(secret_key, generate_nospam())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_preserves_identity() {
        let data = fresh();
        let bytes = encode(&data).expect("encode");
        let restored = decode(&bytes).expect("decode");

        assert_eq!(restored.secret_key, data.secret_key);
        assert_eq!(restored.nospam, data.nospam);
        assert_eq!(restored.public_key(), data.public_key());
    }

    #[test]
    fn test_missing_nospam_regenerates_nonzero() {
        let mut data = fresh();
        data.nospam = None;
        let effective = data.effective_nospam();
        assert!(!is_invalid_nospam(&effective));
    }

    #[test]
    fn test_all_zero_nospam_is_treated_as_invalid() {
        let mut data = fresh();
        data.nospam = Some([0u8; NOSPAM_BYTES]);
        let effective = data.effective_nospam();
        assert!(!is_invalid_nospam(&effective));
    }

    #[test]
    fn test_unknown_fields_survive_a_round_trip() {
        let mut data = fresh();
        data.extra.insert(
            "future_field".to_string(),
            ciborium::value::Value::Text("some value a newer build wrote".to_string()),
        );

        let bytes = encode(&data).expect("encode");
        let restored = decode(&bytes).expect("decode");

        assert_eq!(
            restored.extra.get("future_field"),
            Some(&ciborium::value::Value::Text(
                "some value a newer build wrote".to_string()
            ))
        );
    }

    #[test]
    fn test_friends_round_trip() {
        let mut data = fresh();
        data.friends.push(SavedFriend {
            public_key: [9u8; 32],
            name: "alice".to_string(),
            status_msg: "here".to_string(),
            presence: presence_to_u8(PresenceStatus::Online),
            last_seen: 12345,
        });

        let bytes = encode(&data).expect("encode");
        let restored = decode(&bytes).expect("decode");

        assert_eq!(restored.friends.len(), 1);
        assert_eq!(restored.friends[0].name, "alice");
        assert_eq!(presence_from_u8(restored.friends[0].presence), PresenceStatus::Online);
    }
}
