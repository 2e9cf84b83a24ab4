//! Packet type tags and the 33-byte AEAD header carried by most relay
//! packet types.
//!
//! The header sits immediately after the packet type byte and the
//! chonkle trailer (see `filter`); it does not encrypt the payload, it
//! authenticates `(packet_type, sequence, session_id, session_version)`
//! so a tampered or replayed packet is caught before forwarding does any
//! real work. Route request (9) and continue request (15) are the
//! exceptions: they carry a raw sealed token immediately after chonkle
//! with no header at all, and near/relay ping-pong (20/21/75/76) carry a
//! small stateless payload with neither a header nor a token -- see
//! `forwarding::parse_frame` for how each type's body is actually sliced.

use crate::crypto::HEADER_TAG_BYTES;
use crate::primitives::{Reader, Writer};
use crate::{Error, Result};

pub const HEADER_BYTES: usize = 8 /* sequence */ + 8 /* session_id */ + 1 /* session_version */ + HEADER_TAG_BYTES;

/// Relay packet types, as carried in the first wire byte. `Direct` (0) is
/// the passthrough type used for traffic that bypasses the session
/// machinery entirely (e.g. plain pings during bring-up); every other
/// type is dispatched by the forwarding state machine. Tag values match
/// spec.md §4.F exactly -- they are not a free naming choice, several are
/// non-contiguous because they mirror the reference relay's own wire
/// constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Direct = 0,
    RouteRequest = 9,
    RouteResponse = 10,
    ClientToServer = 11,
    ServerToClient = 12,
    SessionPing = 13,
    SessionPong = 14,
    ContinueRequest = 15,
    ContinueResponse = 16,
    NearPing = 20,
    NearPong = 21,
    RelayPing = 75,
    RelayPong = 76,
}

impl PacketType {
    pub const ALL: [PacketType; 13] = [
        PacketType::Direct,
        PacketType::RouteRequest,
        PacketType::RouteResponse,
        PacketType::ClientToServer,
        PacketType::ServerToClient,
        PacketType::SessionPing,
        PacketType::SessionPong,
        PacketType::ContinueRequest,
        PacketType::ContinueResponse,
        PacketType::NearPing,
        PacketType::NearPong,
        PacketType::RelayPing,
        PacketType::RelayPong,
    ];
}

impl TryFrom<u8> for PacketType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        PacketType::ALL
            .into_iter()
            .find(|t| *t as u8 == value)
            .ok_or(Error::InvalidPacketType(value))
    }
}

/// Authenticated header: `sequence(8) || session_id(8) || session_version(1) || tag(16)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub sequence: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub tag: [u8; HEADER_TAG_BYTES],
}

impl Header {
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut w = Writer::with_capacity(HEADER_BYTES);
        w.write_u64(self.sequence);
        w.write_u64(self.session_id);
        w.write_u8(self.session_version);
        w.write_bytes(&self.tag);

        let bytes = w.into_inner();
        let mut out = [0u8; HEADER_BYTES];
        out.copy_from_slice(&bytes);
        out
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let sequence = r.read_u64()?;
        let session_id = r.read_u64()?;
        let session_version = r.read_u8()?;
        let tag: [u8; HEADER_TAG_BYTES] = r.read_array()?;

        Ok(Self {
            sequence,
            session_id,
            session_version,
            tag,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips() {
        let header = Header {
            sequence: 1234,
            session_id: 0xabcd_ef01_2345_6789,
            session_version: 2,
            tag: [9; HEADER_TAG_BYTES],
        };

        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_BYTES);
        assert_eq!(Header::decode(&bytes).unwrap(), header);
    }

    #[test]
    fn packet_type_round_trips_known_values() {
        for t in PacketType::ALL {
            assert_eq!(PacketType::try_from(t as u8).unwrap(), t);
        }
    }

    #[test]
    fn packet_type_rejects_unknown_value() {
        assert!(PacketType::try_from(200).is_err());
    }
}
