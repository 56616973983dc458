//! Tox ID encoding: `public_key(32) || nospam(4) || checksum(2)`, rendered
//! on the wire as 76 uppercase hex characters.

use crate::keys::{PublicKey32, PUBLIC_KEY_BYTES};
use crate::nonce::NOSPAM_BYTES;

/// Total length of a decoded Tox ID, in bytes.
pub const TOX_ID_BYTES: usize = PUBLIC_KEY_BYTES + NOSPAM_BYTES + 2;

/// Length of an encoded Tox ID, in hex characters.
pub const TOX_ID_HEX_LEN: usize = TOX_ID_BYTES * 2;

/// Errors from decoding a Tox ID string.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ToxIdError {
    /// The decoded byte length did not match [`TOX_ID_BYTES`].
    #[error("invalid Tox ID length: expected {TOX_ID_HEX_LEN} hex chars, got {actual}")]
    InvalidLength { actual: usize },

    /// The string was not valid hex.
    #[error("invalid hex in Tox ID")]
    InvalidHex,

    /// The trailing checksum did not match the computed checksum.
    #[error("Tox ID checksum mismatch")]
    InvalidChecksum,
}

/// Compute the 2-byte XOR-fold checksum over `public_key || nospam`.
fn checksum(public_key: &[u8; PUBLIC_KEY_BYTES], nospam: &[u8; NOSPAM_BYTES]) -> [u8; 2] {
    let mut check = [0u8; 2];
    for (i, byte) in public_key.iter().chain(nospam.iter()).enumerate() {
        check[i % 2] ^= byte;
    }
    check
}

/// Encode a public key and nospam value into a 76-character uppercase hex
/// Tox ID.
pub fn encode(public_key: &PublicKey32, nospam: &[u8; NOSPAM_BYTES]) -> String {
    let check = checksum(&public_key.0, nospam);
    let mut bytes = Vec::with_capacity(TOX_ID_BYTES);
    bytes.extend_from_slice(&public_key.0);
    bytes.extend_from_slice(nospam);
    bytes.extend_from_slice(&check);
    hex::encode_upper(bytes)
}

/// Decode a Tox ID string into its public key and nospam components,
/// validating the trailing checksum.
pub fn decode(tox_id: &str) -> Result<(PublicKey32, [u8; NOSPAM_BYTES]), ToxIdError> {
    if tox_id.len() != TOX_ID_HEX_LEN {
        return Err(ToxIdError::InvalidLength {
            actual: tox_id.len(),
        });
    }
    let bytes = hex::decode(tox_id).map_err(|_| ToxIdError::InvalidHex)?;
    if bytes.len() != TOX_ID_BYTES {
        return Err(ToxIdError::InvalidLength {
            actual: bytes.len(),
        });
    }

    let mut public_key = [0u8; PUBLIC_KEY_BYTES];
    public_key.copy_from_slice(&bytes[..PUBLIC_KEY_BYTES]);

    let mut nospam = [0u8; NOSPAM_BYTES];
    nospam.copy_from_slice(&bytes[PUBLIC_KEY_BYTES..PUBLIC_KEY_BYTES + NOSPAM_BYTES]);

    let mut given_check = [0u8; 2];
    given_check.copy_from_slice(&bytes[PUBLIC_KEY_BYTES + NOSPAM_BYTES..]);

    if checksum(&public_key, &nospam) != given_check {
        return Err(ToxIdError::InvalidChecksum);
    }

    Ok((PublicKey32(public_key), nospam))
}
