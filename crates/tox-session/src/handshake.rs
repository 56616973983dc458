//! The Noise-IK handshake state machine.
//!
//! Pattern (Noise `IK`): the initiator already knows the responder's
//! long-term static key. Message 1 carries the initiator's ephemeral key,
//! its encrypted static key, and an encrypted payload; message 2 carries
//! the responder's ephemeral key and its encrypted payload. Both sides
//! fold four Diffie-Hellman results — `es`, `ss`, `ee`, `se` — into a
//! chaining key, from which the send/receive transport keys are derived.
//!
//! States: `uninit -> awaiting_peer -> awaiting_final -> complete ->
//! closed`. Only `complete` permits transport encryption; earlier states
//! reject with [`crate::SessionError::HandshakeIncomplete`].

use serde::{Deserialize, Serialize};

use tox_crypto::aead;
use tox_crypto::blake3::{self, contexts};
use tox_crypto::keys::{self, PublicKey32, SecretKey32};

use crate::{Result, SessionError};

/// A state in the Noise-IK handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Uninit,
    AwaitingPeer,
    AwaitingFinal,
    Complete,
    Closed,
}

/// The role a party plays in a given handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// Message 1: initiator to responder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeMessage1 {
    pub initiator_ephemeral_pub: PublicKey32,
    pub encrypted_static: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
}

/// Message 2: responder to initiator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeMessage2 {
    pub responder_ephemeral_pub: PublicKey32,
    pub encrypted_payload: Vec<u8>,
}

const MSG1_STATIC_NONCE: [u8; 24] = [0u8; 24];
const MSG1_PAYLOAD_NONCE: [u8; 24] = {
    let mut n = [0u8; 24];
    n[23] = 1;
    n
};
const MSG2_PAYLOAD_NONCE: [u8; 24] = [0u8; 24];

/// Transport keys and the transcript hash produced by a completed
/// handshake.
#[derive(Clone)]
pub struct HandshakeOutput {
    pub send_key: [u8; 32],
    pub recv_key: [u8; 32],
    pub handshake_hash: [u8; 32],
}

/// Drives one side of a Noise-IK handshake through to completion.
pub struct Handshake {
    state: HandshakeState,
    role: Role,
    self_static_secret: SecretKey32,
    self_static_public: PublicKey32,
    peer_static_public: Option<PublicKey32>,
    self_ephemeral_secret: Option<SecretKey32>,
    self_ephemeral_public: Option<PublicKey32>,
    peer_ephemeral_public: Option<PublicKey32>,
    transcript: Vec<u8>,
    output: Option<HandshakeOutput>,
}

impl Handshake {
    /// Start a handshake as the initiator, who must already know the
    /// responder's static public key.
    pub fn new_initiator(
        self_static_secret: SecretKey32,
        responder_static_public: PublicKey32,
    ) -> Self {
        let self_static_public = keys::public_key_for(&self_static_secret);
        Self {
            state: HandshakeState::Uninit,
            role: Role::Initiator,
            self_static_secret,
            self_static_public,
            peer_static_public: Some(responder_static_public),
            self_ephemeral_secret: None,
            self_ephemeral_public: None,
            peer_ephemeral_public: None,
            transcript: Vec::new(),
            output: None,
        }
    }

    /// Start a handshake as the responder. The responder learns the
    /// initiator's static key from message 1 itself.
    pub fn new_responder(self_static_secret: SecretKey32) -> Self {
        let self_static_public = keys::public_key_for(&self_static_secret);
        Self {
            state: HandshakeState::Uninit,
            role: Role::Responder,
            self_static_secret,
            self_static_public,
            peer_static_public: None,
            self_ephemeral_secret: None,
            self_ephemeral_public: None,
            peer_ephemeral_public: None,
            transcript: Vec::new(),
            output: None,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The peer's long-term static key, known from construction for an
    /// initiator or learned from message 1 for a responder. `None` before
    /// a responder has read message 1.
    pub fn peer_static_public(&self) -> Option<PublicKey32> {
        self.peer_static_public
    }

    /// Initiator: produce message 1 and move to `awaiting_final`.
    pub fn write_message1(&mut self, payload: &[u8]) -> Result<HandshakeMessage1> {
        if self.role != Role::Initiator || self.state != HandshakeState::Uninit {
            return Err(SessionError::OutOfOrder(self.state));
        }
        let responder_static = self.peer_static_public.expect("initiator always has it");

        let (ephemeral_pub, ephemeral_secret) = keys::generate_keypair();
        let es = keys::diffie_hellman(&ephemeral_secret, &responder_static);

        let msg1_key = blake3::derive_key(contexts::NOISE_MSG1_KEY, &es.0);
        let encrypted_static = aead::encrypt_with_key(
            &msg1_key,
            &MSG1_STATIC_NONCE,
            self.self_static_public.as_bytes(),
        )?;
        let encrypted_payload = if payload.is_empty() {
            Vec::new()
        } else {
            aead::encrypt_with_key(&msg1_key, &MSG1_PAYLOAD_NONCE, payload)?
        };

        self.transcript.extend_from_slice(ephemeral_pub.as_bytes());
        self.transcript.extend_from_slice(&encrypted_static);

        self.self_ephemeral_secret = Some(ephemeral_secret);
        self.self_ephemeral_public = Some(ephemeral_pub);
        self.state = HandshakeState::AwaitingFinal;

        Ok(HandshakeMessage1 {
            initiator_ephemeral_pub: ephemeral_pub,
            encrypted_static,
            encrypted_payload,
        })
    }

    /// Responder: consume message 1, recovering the initiator's static key
    /// and moving to `awaiting_peer` (ready to emit message 2).
    pub fn read_message1(&mut self, msg: &HandshakeMessage1) -> Result<Vec<u8>> {
        if self.role != Role::Responder || self.state != HandshakeState::Uninit {
            return Err(SessionError::OutOfOrder(self.state));
        }

        let es = keys::diffie_hellman(&self.self_static_secret, &msg.initiator_ephemeral_pub);
        let msg1_key = blake3::derive_key(contexts::NOISE_MSG1_KEY, &es.0);

        let static_bytes = aead::decrypt_with_key(&msg1_key, &MSG1_STATIC_NONCE, &msg.encrypted_static)?;
        if static_bytes.len() != 32 {
            return Err(SessionError::Crypto(tox_crypto::CryptoError::InvalidLength {
                expected: 32,
                actual: static_bytes.len(),
            }));
        }
        let mut initiator_static = [0u8; 32];
        initiator_static.copy_from_slice(&static_bytes);
        let initiator_static = PublicKey32(initiator_static);

        let payload = if msg.encrypted_payload.is_empty() {
            Vec::new()
        } else {
            aead::decrypt_with_key(&msg1_key, &MSG1_PAYLOAD_NONCE, &msg.encrypted_payload)?
        };

        self.transcript
            .extend_from_slice(msg.initiator_ephemeral_pub.as_bytes());
        self.transcript.extend_from_slice(&msg.encrypted_static);

        self.peer_static_public = Some(initiator_static);
        self.peer_ephemeral_public = Some(msg.initiator_ephemeral_pub);
        self.state = HandshakeState::AwaitingPeer;

        Ok(payload)
    }

    /// Responder: produce message 2, completing the responder's side of
    /// the handshake.
    pub fn write_message2(&mut self, payload: &[u8]) -> Result<HandshakeMessage2> {
        if self.role != Role::Responder || self.state != HandshakeState::AwaitingPeer {
            return Err(SessionError::OutOfOrder(self.state));
        }

        let (ephemeral_pub, ephemeral_secret) = keys::generate_keypair();
        self.self_ephemeral_secret = Some(ephemeral_secret.clone());
        self.self_ephemeral_public = Some(ephemeral_pub);

        let initiator_ephemeral = self
            .peer_ephemeral_public
            .expect("set by read_message1");
        let dh = self.compute_dh_outputs(&ephemeral_secret, initiator_ephemeral)?;
        let chaining_key = Self::derive_chaining_key(&dh);

        self.transcript.extend_from_slice(ephemeral_pub.as_bytes());
        let handshake_hash = blake3::derive_key(contexts::NOISE_HANDSHAKE_HASH, &self.transcript);

        let msg2_key = blake3::derive_key(
            contexts::NOISE_MSG2_KEY,
            &blake3::encode_multi_field(&[&chaining_key, &handshake_hash]),
        );
        let encrypted_payload = if payload.is_empty() {
            Vec::new()
        } else {
            aead::encrypt_with_key(&msg2_key, &MSG2_PAYLOAD_NONCE, payload)?
        };

        // Responder send key = initiator recv key, and vice versa.
        let send_key = blake3::derive_key(contexts::NOISE_RECV_KEY, &chaining_key);
        let recv_key = blake3::derive_key(contexts::NOISE_SEND_KEY, &chaining_key);
        self.output = Some(HandshakeOutput {
            send_key,
            recv_key,
            handshake_hash,
        });
        self.state = HandshakeState::Complete;

        Ok(HandshakeMessage2 {
            responder_ephemeral_pub: ephemeral_pub,
            encrypted_payload,
        })
    }

    /// Initiator: consume message 2, completing the initiator's side.
    pub fn read_message2(&mut self, msg: &HandshakeMessage2) -> Result<Vec<u8>> {
        if self.role != Role::Initiator || self.state != HandshakeState::AwaitingFinal {
            return Err(SessionError::OutOfOrder(self.state));
        }

        self.peer_ephemeral_public = Some(msg.responder_ephemeral_pub);
        let ephemeral_secret = self
            .self_ephemeral_secret
            .clone()
            .expect("set in write_message1");

        let dh = self.compute_dh_outputs(&ephemeral_secret, msg.responder_ephemeral_pub)?;
        let chaining_key = Self::derive_chaining_key(&dh);

        self.transcript
            .extend_from_slice(msg.responder_ephemeral_pub.as_bytes());
        let handshake_hash = blake3::derive_key(contexts::NOISE_HANDSHAKE_HASH, &self.transcript);

        let msg2_key = blake3::derive_key(
            contexts::NOISE_MSG2_KEY,
            &blake3::encode_multi_field(&[&chaining_key, &handshake_hash]),
        );
        let payload = if msg.encrypted_payload.is_empty() {
            Vec::new()
        } else {
            aead::decrypt_with_key(&msg2_key, &MSG2_PAYLOAD_NONCE, &msg.encrypted_payload)?
        };

        let send_key = blake3::derive_key(contexts::NOISE_SEND_KEY, &chaining_key);
        let recv_key = blake3::derive_key(contexts::NOISE_RECV_KEY, &chaining_key);
        self.output = Some(HandshakeOutput {
            send_key,
            recv_key,
            handshake_hash,
        });
        self.state = HandshakeState::Complete;

        Ok(payload)
    }

    /// The transport keys, once `complete`. Returns
    /// [`SessionError::HandshakeIncomplete`] otherwise.
    pub fn output(&self) -> Result<&HandshakeOutput> {
        self.output.as_ref().ok_or(SessionError::HandshakeIncomplete)
    }

    /// Tear the handshake down; further messages are rejected.
    pub fn close(&mut self) {
        self.state = HandshakeState::Closed;
    }

    fn compute_dh_outputs(
        &self,
        self_ephemeral_secret: &SecretKey32,
        peer_ephemeral_public: PublicKey32,
    ) -> Result<[[u8; 32]; 4]> {
        let peer_static = self
            .peer_static_public
            .ok_or(SessionError::HandshakeIncomplete)?;

        let es = match self.role {
            // Initiator already folded `es` into msg1's key; recompute the
            // same value here from the stored ephemeral secret.
            Role::Initiator => keys::diffie_hellman(
                self.self_ephemeral_secret.as_ref().expect("set"),
                &peer_static,
            ),
            Role::Responder => {
                keys::diffie_hellman(&self.self_static_secret, &self.peer_ephemeral_public.expect("set"))
            }
        };
        let ss = keys::diffie_hellman(&self.self_static_secret, &peer_static);
        let ee = keys::diffie_hellman(self_ephemeral_secret, &peer_ephemeral_public);
        let se = match self.role {
            Role::Initiator => {
                keys::diffie_hellman(&self.self_static_secret, &peer_ephemeral_public)
            }
            Role::Responder => keys::diffie_hellman(
                self_ephemeral_secret,
                &self.peer_static_public.expect("set by read_message1"),
            ),
        };

        Ok([es.0, ss.0, ee.0, se.0])
    }

    fn derive_chaining_key(dh: &[[u8; 32]; 4]) -> [u8; 32] {
        let input = blake3::encode_multi_field(&[&dh[0], &dh[1], &dh[2], &dh[3]]);
        blake3::derive_key(contexts::NOISE_CHAINING_KEY, &input)
    }
}
