//! Byte codec for driver structures
//!
//! Values are written in native byte order with the same padding the C
//! compiler inserts, so `T::WIRE_SIZE == size_of::<T>()` for every
//! `#[repr(C)]` type in `descriptor`.

use super::ProtocolError;

/// Width of `ULONG_PTR`/`HANDLE` fields on this target.
pub const POINTER_SIZE: usize = std::mem::size_of::<usize>();

/// A structure with a fixed on-the-wire layout.
pub trait WireFormat: Sized {
    const WIRE_SIZE: usize;

    fn encode(&self, out: &mut Vec<u8>);

    fn decode(reader: &mut WireReader<'_>) -> Result<Self, ProtocolError>;

    fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIRE_SIZE);
        self.encode(&mut out);
        out
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut reader = WireReader::new(bytes);
        Self::decode(&mut reader)
    }
}

/// Primitive writers for building wire buffers.
pub trait WireWriter {
    fn put_u8(&mut self, value: u8);
    fn put_u16(&mut self, value: u16);
    fn put_i16(&mut self, value: i16);
    fn put_u32(&mut self, value: u32);
    fn put_i32(&mut self, value: i32);
    fn put_u64(&mut self, value: u64);
    fn put_usize(&mut self, value: usize);
    fn pad(&mut self, count: usize);
}

impl WireWriter for Vec<u8> {
    fn put_u8(&mut self, value: u8) {
        self.push(value);
    }

    fn put_u16(&mut self, value: u16) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn put_i16(&mut self, value: i16) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn put_u32(&mut self, value: u32) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn put_i32(&mut self, value: i32) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn put_usize(&mut self, value: usize) {
        self.extend_from_slice(&value.to_ne_bytes());
    }

    fn pad(&mut self, count: usize) {
        self.resize(self.len() + count, 0);
    }
}

/// Cursor over a received buffer.
#[derive(Debug)]
pub struct WireReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn take(&mut self, count: usize) -> Result<&'a [u8], ProtocolError> {
        if self.remaining() < count {
            return Err(ProtocolError::Truncated {
                needed: count,
                available: self.remaining(),
            });
        }
        let slice = &self.bytes[self.pos..self.pos + count];
        self.pos += count;
        Ok(slice)
    }

    pub fn skip(&mut self, count: usize) -> Result<(), ProtocolError> {
        self.take(count).map(|_| ())
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, ProtocolError> {
        Ok(self.take(1)?[0])
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.array().map(u16::from_ne_bytes)
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        self.array().map(i16::from_ne_bytes)
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.array().map(u32::from_ne_bytes)
    }

    pub fn i32(&mut self) -> Result<i32, ProtocolError> {
        self.array().map(i32::from_ne_bytes)
    }

    pub fn u64(&mut self) -> Result<u64, ProtocolError> {
        self.array().map(u64::from_ne_bytes)
    }

    pub fn usize(&mut self) -> Result<usize, ProtocolError> {
        self.array().map(usize::from_ne_bytes)
    }
}
