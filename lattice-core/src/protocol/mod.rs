//! Structured payloads carried in [`Packet`] bodies.
//!
//! Every payload is a serde struct encoded with bincode. The [`Payload`]
//! trait ties each struct to the command type it travels under, so a
//! payload can only be decoded from a packet carrying the matching tag.
//!
//! [`Packet`]: crate::net::Packet

pub mod frame;
pub mod node;

pub use frame::{
    Exit, ExitReply, FinishAllFrames, FinishAllFramesReply, FinishFrame, FinishFrameReply,
    FinishInit, FinishInitReply, FrameReleased, Hello, ObjectDelta, StartFrame, StartFrameReply,
    StartInit, StartInitReply,
};
pub use node::{NodeExit, NodeExitReply, NodeInit, NodeInitReply, NodeStop};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::LatticeError;
use crate::message::CommandType;
use crate::net::Packet;

/// A bincode payload bound to one command type.
pub trait Payload: Serialize + DeserializeOwned {
    const COMMAND: CommandType;

    fn to_bytes(&self) -> Result<Vec<u8>, LatticeError> {
        Ok(bincode::serialize(self)?)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, LatticeError> {
        Ok(bincode::deserialize(bytes)?)
    }

    /// Wrap into a request packet. Use request id 0 for fire-and-forget.
    fn to_command(&self, request_id: u64) -> Result<Packet, LatticeError> {
        Packet::new_command(request_id, Self::COMMAND, self.to_bytes()?)
    }

    /// Wrap into a reply to `request_id`.
    fn to_reply(&self, request_id: u64) -> Result<Packet, LatticeError> {
        Packet::new_response(request_id, Self::COMMAND, self.to_bytes()?)
    }
}
