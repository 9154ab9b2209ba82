//! Length-delimited framing of [`Packet`]s for `tokio_util::codec::Framed`.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::LatticeError;
use crate::net::header::{HEADER_LENGTH, PacketHeader};
use crate::net::packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE, Packet, peek_header};

#[derive(Debug, Default, Clone, Copy)]
pub struct LatticeCodec;

impl Decoder for LatticeCodec {
    type Item = Packet;
    type Error = LatticeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let header: PacketHeader = match peek_header(&src[..]) {
            None => return Ok(None),
            Some(header) => header?,
        };

        let payload_length = header.payload_length() as usize;
        if payload_length > MAX_PAYLOAD_SIZE {
            return Err(LatticeError::FrameTooLarge {
                size: HEADER_LENGTH + payload_length,
                max: MAX_FRAME_SIZE,
            });
        }

        let frame_length = HEADER_LENGTH + payload_length;
        if src.len() < frame_length {
            src.reserve(frame_length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(frame_length);
        let payload = frame.split_off(HEADER_LENGTH).freeze();
        Packet::from_parts(header, payload).map(Some)
    }
}

impl Encoder<Packet> for LatticeCodec {
    type Error = LatticeError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LENGTH + item.payload().len());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandType;

    #[test]
    fn decodes_across_partial_reads() {
        let mut codec = LatticeCodec;
        let pkt = Packet::new_command(5, CommandType::FinishFrame, b"xyz".to_vec()).unwrap();
        let mut encoded = BytesMut::new();
        codec.encode(pkt.clone(), &mut encoded).unwrap();

        let mut src = BytesMut::new();
        src.extend_from_slice(&encoded[..10]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&encoded[10..HEADER_LENGTH + 1]);
        assert!(codec.decode(&mut src).unwrap().is_none());
        src.extend_from_slice(&encoded[HEADER_LENGTH + 1..]);
        assert_eq!(codec.decode(&mut src).unwrap(), Some(pkt));
        assert!(src.is_empty());
    }

    #[test]
    fn decodes_back_to_back_frames() {
        let mut codec = LatticeCodec;
        let mut src = BytesMut::new();
        for id in 1..=3 {
            let pkt = Packet::new_command(id, CommandType::Ping, Vec::new()).unwrap();
            codec.encode(pkt, &mut src).unwrap();
        }
        for id in 1..=3 {
            let pkt = codec.decode(&mut src).unwrap().unwrap();
            assert_eq!(pkt.request_id(), id);
        }
        assert!(codec.decode(&mut src).unwrap().is_none());
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let mut codec = LatticeCodec;
        let header = PacketHeader::new(
            crate::flags::ProtocolFlags::empty(),
            CommandType::Event as u32,
            0,
            u32::MAX,
        );
        let mut src = BytesMut::from(&header.to_bytes()[..]);
        assert!(matches!(
            codec.decode(&mut src),
            Err(LatticeError::FrameTooLarge { .. })
        ));
    }
}
