//! Command dispatch and request correlation.
//!
//! Inbound packets become [`Command`]s tagged with the sending peer. A
//! [`Session`] looks up the handler registered for the command type and
//! posts it to the serial [`CommandQueue`] bound to that type. Whoever owns
//! the queue drains it, running each handler against its own state: the
//! owner of the queue is the only writer of that state.
//!
//! Blocking operations are built on the same queue: the initiator registers
//! a request in its [`RequestHandler`], sends a packet carrying the request
//! id, and keeps draining its queue until the reply handler has served that
//! id. Draining is the suspension point, so a reply can never be missed
//! while waiting for it.

mod barrier;
mod dispatch;
mod queue;
mod request;

pub use barrier::{BarrierCollector, BarrierOutcome};
pub use dispatch::{Session, UnhandledHook};
pub use queue::{CommandQueue, CommandResult, Handler, QueueSender, Queued};
pub use request::{RequestHandler, RequestResult};

use crate::error::LatticeError;
use crate::message::CommandType;
use crate::net::{Packet, PeerId};
use crate::protocol::Payload;

/// An inbound packet together with the peer it came from.
#[derive(Debug, Clone)]
pub struct Command {
    from: PeerId,
    packet: Packet,
}

impl Command {
    pub fn new(from: PeerId, packet: Packet) -> Self {
        Self { from, packet }
    }

    pub fn from(&self) -> PeerId {
        self.from
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }

    pub fn command_type(&self) -> Result<CommandType, LatticeError> {
        self.packet.command()
    }

    pub fn request_id(&self) -> u64 {
        self.packet.request_id()
    }

    /// Decode the payload as `T`, checking that the command tag matches.
    pub fn payload<T: Payload>(&self) -> Result<T, LatticeError> {
        if self.packet.command_id() != T::COMMAND as u32 {
            return Err(LatticeError::ProtocolViolation(
                "payload type does not match command type",
            ));
        }
        T::from_bytes(self.packet.payload())
    }
}
