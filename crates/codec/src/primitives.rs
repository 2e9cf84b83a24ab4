//! Fixed little-endian readers/writers over a byte cursor.
//!
//! The relay never reads the same buffer twice, so `Reader` simply
//! advances a cursor over a borrowed slice rather than wrapping a
//! `bytes::Buf` impl -- cheaper for the hot path and trivial to reason
//! about for AAD construction where exact byte counts matter.

use crate::{Error, Result};

pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::UnexpectedEof);
        }

        let slice = &self.data[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into()?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into()?))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        Ok(self.take(N)?.try_into()?)
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into()?))
    }

    /// Length-prefixed UTF-8 string: u32 length, then bytes, truncated to `cap`.
    pub fn read_string(&mut self, cap: usize) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > cap {
            return Err(Error::StringTooLong);
        }

        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| Error::UnexpectedEof)
    }
}

#[derive(Default)]
pub struct Writer(Vec<u8>);

impl Writer {
    pub fn with_capacity(cap: usize) -> Self {
        Self(Vec::with_capacity(cap))
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn write_u8(&mut self, value: u8) {
        self.0.push(value);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.0.extend_from_slice(&value.to_le_bytes());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.0.extend_from_slice(bytes);
    }

    pub fn write_zeros(&mut self, count: usize) {
        self.0.resize(self.0.len() + count, 0);
    }

    /// Length-prefixed UTF-8 string: u32 length, then bytes.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_bytes(value.as_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_primitives() {
        let mut w = Writer::default();
        w.write_u8(0xab);
        w.write_u16(0x1234);
        w.write_u32(0xdead_beef);
        w.write_u64(0x0123_4567_89ab_cdef);
        w.write_f32(12.5);
        w.write_string("hello");

        let bytes = w.into_inner();
        let mut r = Reader::new(&bytes);
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert_eq!(r.read_u16().unwrap(), 0x1234);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_u64().unwrap(), 0x0123_4567_89ab_cdef);
        assert_eq!(r.read_f32().unwrap(), 12.5);
        assert_eq!(r.read_string(16).unwrap(), "hello");
    }

    #[test]
    fn string_over_cap_fails() {
        let mut w = Writer::default();
        w.write_string("too long for the cap");

        let bytes = w.into_inner();
        let mut r = Reader::new(&bytes);
        assert!(matches!(r.read_string(4), Err(Error::StringTooLong)));
    }

    #[test]
    fn short_buffer_fails() {
        let bytes = [0u8; 2];
        let mut r = Reader::new(&bytes);
        assert!(matches!(r.read_u32(), Err(Error::UnexpectedEof)));
    }
}
