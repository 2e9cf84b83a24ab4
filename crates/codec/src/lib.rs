//! Wire codec for the relay data plane.
//!
//! Covers the fixed-layout binary formats the relay reads and writes on
//! every packet: addresses, route/continue tokens, the 33-byte AEAD
//! header, and the chonkle/pittle ingress filter. None of this module
//! allocates on the hot path beyond what the caller already owns.

pub mod address;
pub mod crypto;
pub mod filter;
pub mod packet;
pub mod primitives;
pub mod token;

pub use address::Address;
pub use packet::{Header, PacketType};
pub use token::{ContinueToken, RouteToken};

use std::array::TryFromSliceError;

#[derive(Debug)]
pub enum Error {
    UnexpectedEof,
    InvalidAddressTag(u8),
    InvalidPacketType(u8),
    StringTooLong,
    DecryptFailed,
    VerifyFailed,
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
