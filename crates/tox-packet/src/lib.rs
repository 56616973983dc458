//! # tox-packet
//!
//! The wire-frame codec shared by every Tox packet type: `type_byte(1) ||
//! body(N)`. This crate is deliberately policy-free — it only knows how to
//! tag and untag a byte buffer. Meaning is assigned by the handlers
//! registered with `tox-transport`.

pub mod kind;

pub use kind::PacketKind;

/// Errors from parsing a wire frame.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PacketError {
    /// The datagram was too short to contain even a type byte.
    #[error("packet is empty")]
    Empty,

    /// The type byte did not match any known [`PacketKind`].
    #[error("unknown packet type byte: {0:#04x}")]
    UnknownType(u8),

    /// This packet kind requires a non-empty body and none was present.
    #[error("packet type {0:?} requires a non-empty body")]
    MissingBody(PacketKind),
}

/// A parsed wire frame: a recognized type tag plus its owned body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: PacketKind,
    pub body: Vec<u8>,
}

impl Packet {
    /// Construct a new packet from a kind and body.
    pub fn new(kind: PacketKind, body: Vec<u8>) -> Self {
        Self { kind, body }
    }

    /// Serialize to the wire format: `type_byte || body`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.body.len());
        out.push(self.kind.as_byte());
        out.extend_from_slice(&self.body);
        out
    }

    /// Parse a datagram into a type tag and owned body.
    ///
    /// Rejects empty datagrams and unrecognized type bytes. Packet kinds
    /// that require a non-empty body (per [`PacketKind::requires_body`])
    /// reject a zero-length body.
    pub fn decode(datagram: &[u8]) -> Result<Packet, PacketError> {
        let (&type_byte, body) = datagram.split_first().ok_or(PacketError::Empty)?;
        let kind = PacketKind::from_byte(type_byte).ok_or(PacketError::UnknownType(type_byte))?;
        if body.is_empty() && kind.requires_body() {
            return Err(PacketError::MissingBody(kind));
        }
        Ok(Packet {
            kind,
            body: body.to_vec(),
        })
    }
}
