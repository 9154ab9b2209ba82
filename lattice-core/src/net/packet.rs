//! A header plus its opaque payload.

use bytes::Bytes;

use crate::error::LatticeError;
use crate::flags::ProtocolFlags;
use crate::message::CommandType;
use crate::net::header::{HEADER_LENGTH, HeaderBytes, PacketHeader};

/// Largest payload a single packet may carry.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;
/// Largest frame (header + payload) the codec accepts.
pub const MAX_FRAME_SIZE: usize = HEADER_LENGTH + MAX_PAYLOAD_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: PacketHeader,
    payload: Bytes,
}

impl Packet {
    /// Keep-alive packet; request id 0, no payload.
    pub fn heartbeat() -> Self {
        Self {
            header: PacketHeader::new(ProtocolFlags::empty(), CommandType::Ping as u32, 0, 0),
            payload: Bytes::new(),
        }
    }

    /// A request (or fire-and-forget command when `request_id` is 0).
    pub fn new_command(
        request_id: u64,
        command: CommandType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, LatticeError> {
        Self::with_flags(request_id, command, payload.into(), ProtocolFlags::empty())
    }

    /// A reply carrying the id of the request it answers.
    pub fn new_response(
        request_id: u64,
        command: CommandType,
        payload: impl Into<Bytes>,
    ) -> Result<Self, LatticeError> {
        Self::with_flags(request_id, command, payload.into(), ProtocolFlags::REPLY)
    }

    /// A packet that only ever travels through a local dispatch table.
    pub fn local(command: CommandType) -> Self {
        Self {
            header: PacketHeader::new(ProtocolFlags::LOCAL, command as u32, 0, 0),
            payload: Bytes::new(),
        }
    }

    fn with_flags(
        request_id: u64,
        command: CommandType,
        payload: Bytes,
        flags: ProtocolFlags,
    ) -> Result<Self, LatticeError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LatticeError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let length = u32::try_from(payload.len()).map_err(|_| LatticeError::PayloadTooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        })?;

        let mut header = PacketHeader::new(flags, command as u32, request_id, length);
        if !payload.is_empty() {
            header.set_checksum(checksum(&payload));
        }
        Ok(Self { header, payload })
    }

    pub fn header(&self) -> &PacketHeader {
        &self.header
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The typed command, or `UnknownVariant` for a tag this build does not
    /// know.
    pub fn command(&self) -> Result<CommandType, LatticeError> {
        CommandType::try_from(self.header.command_id())
    }

    pub fn command_id(&self) -> u32 {
        self.header.command_id()
    }

    pub fn request_id(&self) -> u64 {
        self.header.request_id()
    }

    pub fn flags(&self) -> ProtocolFlags {
        self.header.flags()
    }

    pub fn is_reply(&self) -> bool {
        self.header.flags().contains(ProtocolFlags::REPLY)
    }

    /// Serialize header and payload into one contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LENGTH + self.payload.len());
        out.extend_from_slice(&self.header.to_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse one complete packet; `bytes` must hold exactly one frame.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LatticeError> {
        let (head, body) = bytes
            .split_first_chunk::<HEADER_LENGTH>()
            .ok_or(LatticeError::ProtocolViolation("packet shorter than header"))?;
        let header = PacketHeader::from_bytes(head)?;
        Self::from_parts(header, Bytes::copy_from_slice(body))
    }

    /// Assemble a packet from an already-parsed header and its payload.
    pub fn from_parts(header: PacketHeader, payload: Bytes) -> Result<Self, LatticeError> {
        if payload.len() != header.payload_length() as usize {
            return Err(LatticeError::ProtocolViolation(
                "payload length does not match header",
            ));
        }
        let packet = Self { header, payload };
        if !packet.validate() {
            return Err(LatticeError::ChecksumMismatch);
        }
        Ok(packet)
    }

    /// Check the payload against the header checksum.
    pub fn validate(&self) -> bool {
        if self.payload.is_empty() {
            return self.header.checksum() == 0;
        }
        self.header.checksum() == checksum(&self.payload)
    }
}

/// First four bytes of the blake3 digest, little-endian.
fn checksum(payload: &[u8]) -> u32 {
    let digest = blake3::hash(payload);
    let [a, b, c, d, ..] = *digest.as_bytes();
    u32::from_le_bytes([a, b, c, d])
}

/// Convenience for header-only views of a raw frame.
pub fn peek_header(bytes: &[u8]) -> Option<Result<PacketHeader, LatticeError>> {
    let head: &HeaderBytes = bytes.first_chunk::<HEADER_LENGTH>()?;
    Some(PacketHeader::from_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_bytes_parse_back() {
        let pkt = Packet::new_command(9, CommandType::StartFrame, b"frame".to_vec()).unwrap();
        let bytes = pkt.to_bytes();
        assert_eq!(bytes.len(), HEADER_LENGTH + 5);

        let parsed = Packet::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.request_id(), 9);
        assert_eq!(parsed.command().unwrap(), CommandType::StartFrame);
        assert_eq!(parsed.payload(), b"frame");
        assert!(!parsed.is_reply());
    }

    #[test]
    fn response_is_flagged() {
        let pkt = Packet::new_response(3, CommandType::ExitReply, Vec::new()).unwrap();
        assert!(pkt.is_reply());
        assert!(pkt.validate());
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let pkt = Packet::new_command(1, CommandType::Event, b"abc".to_vec()).unwrap();
        let mut bytes = pkt.to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            Packet::from_bytes(&bytes),
            Err(LatticeError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_packet_is_rejected() {
        let pkt = Packet::new_command(1, CommandType::Event, b"abcdef".to_vec()).unwrap();
        let bytes = pkt.to_bytes();
        assert!(Packet::from_bytes(&bytes[..bytes.len() - 2]).is_err());
        assert!(Packet::from_bytes(&bytes[..4]).is_err());
    }

    #[test]
    fn unknown_command_tag_surfaces_on_access() {
        let header = PacketHeader::new(ProtocolFlags::empty(), 0x7777, 0, 0);
        let pkt = Packet::from_parts(header, Bytes::new()).unwrap();
        assert!(pkt.command().is_err());
        assert_eq!(pkt.command_id(), 0x7777);
    }

    #[test]
    fn peek_header_needs_full_header() {
        let pkt = Packet::heartbeat();
        let bytes = pkt.to_bytes();
        assert!(peek_header(&bytes[..10]).is_none());
        assert_eq!(
            peek_header(&bytes).unwrap().unwrap().command_id(),
            CommandType::Ping as u32
        );
    }
}
