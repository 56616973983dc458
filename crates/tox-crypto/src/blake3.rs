//! Domain-separated BLAKE3 hashing.
//!
//! BLAKE3 serves several distinct purposes across the crypto and session
//! layers; each is pinned to its own context string so a key derived for
//! one purpose can never be confused with a key derived for another.
//!
//! - [`hash`] — content-independent hashing (checksums, fingerprints)
//! - [`derive_key`] — key derivation from shared secrets
//! - [`keyed_hash`] — keyed MAC, used as the HMAC-equivalent for the
//!   version-commitment exchange

/// Registered BLAKE3 KDF context strings.
pub mod contexts {
    pub const LEGACY_BOX_KEY: &str = "tox-rs v1 legacy-box-key";
    pub const NOISE_HANDSHAKE_HASH: &str = "tox-rs v1 noise-handshake-hash";
    pub const NOISE_CHAINING_KEY: &str = "tox-rs v1 noise-chaining-key";
    pub const NOISE_MSG1_KEY: &str = "tox-rs v1 noise-msg1-key";
    pub const NOISE_MSG2_KEY: &str = "tox-rs v1 noise-msg2-key";
    pub const NOISE_SEND_KEY: &str = "tox-rs v1 noise-send-key";
    pub const NOISE_RECV_KEY: &str = "tox-rs v1 noise-recv-key";
    pub const VERSION_COMMITMENT_KEY: &str = "tox-rs v1 version-commitment-key";
    pub const PREKEY_BOX_KEY: &str = "tox-rs v1 prekey-box-key";
}

/// Compute the BLAKE3 hash of `data`.
pub fn hash(data: &[u8]) -> [u8; 32] {
    *::blake3::hash(data).as_bytes()
}

/// Derive a 32-byte key from `key_material` under `context`.
pub fn derive_key(context: &str, key_material: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut hasher = ::blake3::Hasher::new_derive_key(context);
    hasher.update(key_material);
    out.copy_from_slice(hasher.finalize().as_bytes());
    out
}

/// Compute a keyed BLAKE3 hash (MAC). `key` should come from [`derive_key`].
pub fn keyed_hash(key: &[u8; 32], message: &[u8]) -> [u8; 32] {
    *::blake3::keyed_hash(key, message).as_bytes()
}

/// Length-prefix and concatenate several fields so a KDF input over
/// multiple dynamic-length values can't be confused by shifting a
/// boundary between them.
pub fn encode_multi_field(fields: &[&[u8]]) -> Vec<u8> {
    let total_len: usize = fields.iter().map(|f| 4 + f.len()).sum();
    let mut out = Vec::with_capacity(total_len);
    for field in fields {
        out.extend_from_slice(&(field.len() as u32).to_le_bytes());
        out.extend_from_slice(field);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key(contexts::NOISE_SEND_KEY, b"shared-secret");
        let b = derive_key(contexts::NOISE_SEND_KEY, b"shared-secret");
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_key_context_separation() {
        let a = derive_key(contexts::NOISE_SEND_KEY, b"shared-secret");
        let b = derive_key(contexts::NOISE_RECV_KEY, b"shared-secret");
        assert_ne!(a, b);
    }

    #[test]
    fn test_keyed_hash_changes_with_key() {
        let key_a = derive_key(contexts::VERSION_COMMITMENT_KEY, b"one");
        let key_b = derive_key(contexts::VERSION_COMMITMENT_KEY, b"two");
        assert_ne!(keyed_hash(&key_a, b"msg"), keyed_hash(&key_b, b"msg"));
    }

    #[test]
    fn test_encode_multi_field_is_unambiguous() {
        let a = encode_multi_field(&[b"ab", b"c"]);
        let b = encode_multi_field(&[b"a", b"bc"]);
        assert_ne!(a, b);
    }
}
