//! Wire address forms.
//!
//! Two serializations exist because cryptographically authenticated
//! structures (tokens, headers) need position-stable fields regardless of
//! address family, while the short form is only ever used where the
//! caller already knows the address is IPv4.

use crate::primitives::{Reader, Writer};
use crate::{Error, Result};

pub const ADDRESS_BYTES: usize = 19;
pub const ADDRESS_BYTES_SHORT: usize = 7;

const TAG_NONE: u8 = 0;
const TAG_IPV4: u8 = 1;
const TAG_IPV6: u8 = 2;

/// A relay-facing address: no direct IP stack dependency, so the relay can
/// represent "no next hop yet" without an `Option` wrapper at every call
/// site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Address {
    None,
    V4 { octets: [u8; 4], port: u16 },
    V6 { groups: [u16; 8], port: u16 },
}

impl Address {
    pub fn port(&self) -> u16 {
        match self {
            Address::None => 0,
            Address::V4 { port, .. } => *port,
            Address::V6 { port, .. } => *port,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Address::None)
    }

    /// Raw address bytes and port, big-endian network order, as consumed by
    /// the chonkle/pittle filter (§4.C) which hashes the wire representation
    /// of the address rather than this codec's padded forms.
    pub fn filter_bytes(&self) -> (Vec<u8>, u16) {
        match self {
            Address::None => (Vec::new(), 0),
            Address::V4 { octets, port } => (octets.to_vec(), *port),
            Address::V6 { groups, port } => {
                let mut bytes = Vec::with_capacity(16);
                for group in groups {
                    bytes.extend_from_slice(&group.to_be_bytes());
                }
                (bytes, *port)
            }
        }
    }

    /// Write the 19-byte padded form used inside tokens and headers.
    pub fn write_long(&self, w: &mut Writer) {
        match self {
            Address::None => {
                w.write_u8(TAG_NONE);
                w.write_zeros(ADDRESS_BYTES - 1);
            }
            Address::V4 { octets, port } => {
                w.write_u8(TAG_IPV4);
                w.write_bytes(octets);
                w.write_u16(*port);
                w.write_zeros(ADDRESS_BYTES - 1 - 4 - 2);
            }
            Address::V6 { groups, port } => {
                w.write_u8(TAG_IPV6);
                for group in groups {
                    w.write_u16(*group);
                }
                w.write_u16(*port);
            }
        }
    }

    pub fn read_long(r: &mut Reader) -> Result<Self> {
        let tag = r.read_u8()?;
        let value = match tag {
            TAG_NONE => {
                r.read_bytes(ADDRESS_BYTES - 1)?;
                Address::None
            }
            TAG_IPV4 => {
                let octets: [u8; 4] = r.read_array()?;
                let port = r.read_u16()?;
                r.read_bytes(ADDRESS_BYTES - 1 - 4 - 2)?;
                Address::V4 { octets, port }
            }
            TAG_IPV6 => {
                let mut groups = [0u16; 8];
                for group in groups.iter_mut() {
                    *group = r.read_u16()?;
                }
                let port = r.read_u16()?;
                Address::V6 { groups, port }
            }
            other => return Err(Error::InvalidAddressTag(other)),
        };

        Ok(value)
    }

    /// Write the 7-byte short (IPv4-only) form.
    pub fn write_short(&self, w: &mut Writer) -> Result<()> {
        match self {
            Address::V4 { octets, port } => {
                w.write_u8(TAG_IPV4);
                w.write_bytes(octets);
                w.write_u16(*port);
                Ok(())
            }
            Address::None => {
                w.write_u8(TAG_NONE);
                w.write_zeros(ADDRESS_BYTES_SHORT - 1);
                Ok(())
            }
            Address::V6 { .. } => Err(Error::InvalidAddressTag(TAG_IPV6)),
        }
    }

    pub fn read_short(r: &mut Reader) -> Result<Self> {
        let tag = r.read_u8()?;
        let value = match tag {
            TAG_NONE => {
                r.read_bytes(ADDRESS_BYTES_SHORT - 1)?;
                Address::None
            }
            TAG_IPV4 => {
                let octets: [u8; 4] = r.read_array()?;
                let port = r.read_u16()?;
                Address::V4 { octets, port }
            }
            other => return Err(Error::InvalidAddressTag(other)),
        };

        Ok(value)
    }
}

impl From<std::net::SocketAddr> for Address {
    fn from(addr: std::net::SocketAddr) -> Self {
        match addr {
            std::net::SocketAddr::V4(v4) => Address::V4 {
                octets: v4.ip().octets(),
                port: v4.port(),
            },
            std::net::SocketAddr::V6(v6) => Address::V6 {
                groups: v6.ip().segments(),
                port: v6.port(),
            },
        }
    }
}

impl TryFrom<Address> for std::net::SocketAddr {
    type Error = Error;

    fn try_from(addr: Address) -> Result<Self> {
        match addr {
            Address::V4 { octets, port } => Ok(std::net::SocketAddr::from((octets, port))),
            Address::V6 { groups, port } => Ok(std::net::SocketAddr::from((groups, port))),
            Address::None => Err(Error::InvalidAddressTag(TAG_NONE)),
        }
    }
}
