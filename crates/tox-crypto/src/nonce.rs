//! Nonce and nospam generation.

use rand::RngCore;

/// Number of bytes in a legacy-box nonce.
pub const NONCE_BYTES: usize = 24;

/// Number of bytes in a nospam value.
pub const NOSPAM_BYTES: usize = 4;

/// Generate a fresh 24-byte random nonce for the legacy per-message box.
pub fn generate_nonce() -> [u8; NONCE_BYTES] {
    let mut nonce = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Generate a fresh 4-byte nospam value.
///
/// Regenerates if the CSPRNG happens to return all-zero bytes: an all-zero
/// nospam is treated as invalid at rest (spec open question), so it is
/// never handed back to the caller.
pub fn generate_nospam() -> [u8; NOSPAM_BYTES] {
    loop {
        let mut nospam = [0u8; NOSPAM_BYTES];
        rand::rngs::OsRng.fill_bytes(&mut nospam);
        if nospam != [0u8; NOSPAM_BYTES] {
            return nospam;
        }
    }
}

/// Whether a nospam value is the invalid all-zero sentinel.
pub fn is_invalid_nospam(nospam: &[u8; NOSPAM_BYTES]) -> bool {
    *nospam == [0u8; NOSPAM_BYTES]
}
