//! Route and continue token cleartext layouts.
//!
//! These are the payloads sealed inside a libsodium-compatible sealed box
//! by the session server and opened by each relay hop. This module only
//! knows the byte layout; `crypto` owns sealing/opening.

use crate::address::{Address, ADDRESS_BYTES_SHORT};
use crate::primitives::{Reader, Writer};
use crate::Result;

/// Cleartext size of a route token, before sealing.
pub const ROUTE_TOKEN_BYTES: usize = 76;
/// Cleartext size of a continue token, before sealing.
pub const CONTINUE_TOKEN_BYTES: usize = 17;

const ROUTE_TOKEN_RESERVED: usize = ROUTE_TOKEN_BYTES
    - 8 // expire_timestamp
    - 8 // session_id
    - 1 // session_version
    - 4 // kbps_up
    - 4 // kbps_down
    - ADDRESS_BYTES_SHORT // next_address
    - 1 // next_is_internal
    - 1 // prev_is_internal
    - 32; // session private key

/// Issued by the session server for the first hop a relay forwards a
/// packet to. Carries the per-hop bandwidth envelope and the key used to
/// authenticate packets for the rest of this session's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
    pub kbps_up: u32,
    pub kbps_down: u32,
    pub next_address: Address,
    pub next_is_internal: bool,
    pub prev_is_internal: bool,
    pub session_private_key: [u8; 32],
}

impl RouteToken {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(ROUTE_TOKEN_BYTES);
        w.write_u64(self.expire_timestamp);
        w.write_u64(self.session_id);
        w.write_u8(self.session_version);
        w.write_u32(self.kbps_up);
        w.write_u32(self.kbps_down);
        self.next_address
            .write_short(&mut w)
            .expect("next_address must be representable in short form");
        w.write_u8(self.next_is_internal as u8);
        w.write_u8(self.prev_is_internal as u8);
        w.write_zeros(ROUTE_TOKEN_RESERVED);
        w.write_bytes(&self.session_private_key);

        let bytes = w.into_inner();
        debug_assert_eq!(bytes.len(), ROUTE_TOKEN_BYTES);
        bytes
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let expire_timestamp = r.read_u64()?;
        let session_id = r.read_u64()?;
        let session_version = r.read_u8()?;
        let kbps_up = r.read_u32()?;
        let kbps_down = r.read_u32()?;
        let next_address = Address::read_short(&mut r)?;
        let next_is_internal = r.read_u8()? != 0;
        let prev_is_internal = r.read_u8()? != 0;
        r.read_bytes(ROUTE_TOKEN_RESERVED)?;
        let session_private_key: [u8; 32] = r.read_array()?;

        Ok(Self {
            expire_timestamp,
            session_id,
            session_version,
            kbps_up,
            kbps_down,
            next_address,
            next_is_internal,
            prev_is_internal,
            session_private_key,
        })
    }
}

/// Issued on session refresh, reusing the private key already bound to the
/// session so only the expiry needs re-sealing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinueToken {
    pub expire_timestamp: u64,
    pub session_id: u64,
    pub session_version: u8,
}

impl ContinueToken {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(CONTINUE_TOKEN_BYTES);
        w.write_u64(self.expire_timestamp);
        w.write_u64(self.session_id);
        w.write_u8(self.session_version);

        let bytes = w.into_inner();
        debug_assert_eq!(bytes.len(), CONTINUE_TOKEN_BYTES);
        bytes
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        Ok(Self {
            expire_timestamp: r.read_u64()?,
            session_id: r.read_u64()?,
            session_version: r.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_token_round_trips() {
        let token = RouteToken {
            expire_timestamp: 1_800_000_000,
            session_id: 0xdead_beef_cafe_babe,
            session_version: 3,
            kbps_up: 512,
            kbps_down: 2048,
            next_address: Address::V4 {
                octets: [203, 0, 113, 7],
                port: 40000,
            },
            next_is_internal: true,
            prev_is_internal: false,
            session_private_key: [0x42; 32],
        };

        let bytes = token.encode();
        assert_eq!(bytes.len(), ROUTE_TOKEN_BYTES);
        assert_eq!(RouteToken::decode(&bytes).unwrap(), token);
    }

    #[test]
    fn continue_token_round_trips() {
        let token = ContinueToken {
            expire_timestamp: 1_800_000_060,
            session_id: 0x1122_3344_5566_7788,
            session_version: 4,
        };

        let bytes = token.encode();
        assert_eq!(bytes.len(), CONTINUE_TOKEN_BYTES);
        assert_eq!(ContinueToken::decode(&bytes).unwrap(), token);
    }
}
