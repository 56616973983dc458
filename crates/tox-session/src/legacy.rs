//! The legacy per-message box, used when a peer has not advertised (or
//! does not respond to) Noise-IK. Each message is independently encrypted
//! with the sender's long-term key and the recipient's, rather than a
//! handshake-derived transport key, and carries the sender's public key in
//! the clear so the recipient knows which key to decrypt with.

use tox_crypto::aead;
use tox_crypto::keys::{PublicKey32, SecretKey32};
use tox_crypto::nonce;

use crate::Result;

/// A legacy-framed message: the sender's public key followed by a nonce
/// and the AEAD ciphertext. Self-describing, since the legacy box has no
/// session state to carry that information implicitly.
pub struct LegacyFrame {
    pub sender_public: PublicKey32,
    pub nonce: [u8; 24],
    pub ciphertext: Vec<u8>,
}

impl LegacyFrame {
    /// Encrypt `plaintext` for `recipient_public`, framed for the wire.
    pub fn seal(
        plaintext: &[u8],
        sender_secret: &SecretKey32,
        sender_public: PublicKey32,
        recipient_public: &PublicKey32,
    ) -> Result<Self> {
        let nonce = nonce::generate_nonce();
        let ciphertext = aead::encrypt(plaintext, &nonce, recipient_public, sender_secret)?;
        Ok(Self {
            sender_public,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt a frame addressed to `recipient_secret`.
    pub fn open(&self, recipient_secret: &SecretKey32) -> Result<Vec<u8>> {
        let plaintext = aead::decrypt(
            &self.ciphertext,
            &self.nonce,
            &self.sender_public,
            recipient_secret,
        )?;
        Ok(plaintext)
    }

    /// Serialize as `sender_public || nonce || ciphertext`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + 24 + self.ciphertext.len());
        out.extend_from_slice(self.sender_public.as_bytes());
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse a frame previously produced by [`Self::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 32 + 24 {
            return Err(crate::SessionError::Crypto(
                tox_crypto::CryptoError::InvalidLength {
                    expected: 32 + 24,
                    actual: bytes.len(),
                },
            ));
        }
        let mut sender_public = [0u8; 32];
        sender_public.copy_from_slice(&bytes[..32]);
        let mut nonce = [0u8; 24];
        nonce.copy_from_slice(&bytes[32..56]);
        let ciphertext = bytes[56..].to_vec();
        Ok(Self {
            sender_public: PublicKey32(sender_public),
            nonce,
            ciphertext,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tox_crypto::keys::generate_keypair;

    #[test]
    fn test_seal_open_roundtrip() {
        let (alice_pub, alice_sec) = generate_keypair();
        let (bob_pub, bob_sec) = generate_keypair();

        let frame = LegacyFrame::seal(b"hi bob", &alice_sec, alice_pub, &bob_pub).expect("seal");
        let plaintext = frame.open(&bob_sec).expect("open");
        assert_eq!(plaintext, b"hi bob");
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (alice_pub, alice_sec) = generate_keypair();
        let (bob_pub, bob_sec) = generate_keypair();

        let frame = LegacyFrame::seal(b"hi bob", &alice_sec, alice_pub, &bob_pub).expect("seal");
        let bytes = frame.encode();
        let decoded = LegacyFrame::decode(&bytes).expect("decode");
        let plaintext = decoded.open(&bob_sec).expect("open");
        assert_eq!(plaintext, b"hi bob");
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let err = LegacyFrame::decode(&[0u8; 10]).unwrap_err();
        assert!(matches!(
            err,
            crate::SessionError::Crypto(tox_crypto::CryptoError::InvalidLength { .. })
        ));
    }

    #[test]
    fn test_open_with_wrong_key_fails() {
        let (alice_pub, alice_sec) = generate_keypair();
        let (bob_pub, _bob_sec) = generate_keypair();
        let (_eve_pub, eve_sec) = generate_keypair();

        let frame = LegacyFrame::seal(b"hi bob", &alice_sec, alice_pub, &bob_pub).expect("seal");
        assert!(frame.open(&eve_sec).is_err());
    }
}
