//! Fixed-size packet header.
//!
//! ```text
//!  0       4       6       8          12        16                24        28
//!  +-------+-------+-------+----------+---------+-----------------+---------+
//!  | LTC0  | ver   | flags | checksum | command | request id      | length  |
//!  +-------+-------+-------+----------+---------+-----------------+---------+
//! ```
//!
//! All integers are little-endian.

use bytes::{Buf, BufMut};

use crate::error::LatticeError;
use crate::flags::ProtocolFlags;

pub const MAGIC: [u8; 4] = *b"LTC0";
pub const PROTOCOL_VERSION: u16 = 1;
pub const HEADER_LENGTH: usize = 28;

pub type HeaderBytes = [u8; HEADER_LENGTH];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    version: u16,
    flags: ProtocolFlags,
    checksum: u32,
    command_id: u32,
    request_id: u64,
    payload_length: u32,
}

impl PacketHeader {
    pub fn new(
        flags: ProtocolFlags,
        command_id: u32,
        request_id: u64,
        payload_length: u32,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            flags,
            checksum: 0,
            command_id,
            request_id,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> HeaderBytes {
        let mut out = [0u8; HEADER_LENGTH];
        let mut buf = &mut out[..];
        buf.put_slice(&MAGIC);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.flags.bits());
        buf.put_u32_le(self.checksum);
        buf.put_u32_le(self.command_id);
        buf.put_u64_le(self.request_id);
        buf.put_u32_le(self.payload_length);
        out
    }

    pub fn from_bytes(bytes: &HeaderBytes) -> Result<Self, LatticeError> {
        let mut buf = &bytes[..];
        let mut magic = [0u8; 4];
        buf.copy_to_slice(&mut magic);
        if magic != MAGIC {
            return Err(LatticeError::InvalidMagic);
        }

        let version = buf.get_u16_le();
        if version != PROTOCOL_VERSION {
            return Err(LatticeError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            flags: ProtocolFlags::from_bits_truncate(buf.get_u16_le()),
            checksum: buf.get_u32_le(),
            command_id: buf.get_u32_le(),
            request_id: buf.get_u64_le(),
            payload_length: buf.get_u32_le(),
        })
    }

    pub fn version(&self) -> u16 {
        self.version
    }

    pub fn flags(&self) -> ProtocolFlags {
        self.flags
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: u32) {
        self.checksum = checksum;
    }

    pub fn command_id(&self) -> u32 {
        self.command_id
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }
}
