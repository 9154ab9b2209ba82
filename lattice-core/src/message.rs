//! Command type tags.
//!
//! Every packet carries one of these as a `u32`. The dispatch table of a
//! [`Session`](crate::session::Session) is keyed by them.

use crate::error::LatticeError;
use std::fmt;

/// All commands understood by the lattice protocol.
///
/// Organized by category:
/// - `0x0001..0x00FF`: link level (heartbeat, hello, link loss)
/// - `0x0100..0x01FF`: config init/exit barriers, frames, events, objects
/// - `0x0200..0x02FF`: node lifecycle
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandType {
    // ── Link (0x00xx) ────────────────────────────────────────────
    /// Keep-alive; never dispatched.
    Ping = 0x0001,
    /// A worker announces itself after the link is up.
    Hello = 0x0002,
    /// Synthesized when a peer link closes.
    PeerDisconnected = 0x0003,

    // ── Config (0x01xx) ──────────────────────────────────────────
    StartInit = 0x0101,
    StartInitReply = 0x0102,
    FinishInit = 0x0103,
    FinishInitReply = 0x0104,
    Exit = 0x0105,
    ExitReply = 0x0106,
    StartFrame = 0x0107,
    StartFrameReply = 0x0108,
    FinishFrame = 0x0109,
    FinishFrameReply = 0x010A,
    FinishAllFrames = 0x010B,
    FinishAllFramesReply = 0x010C,
    /// A node consumed a frame's inputs; its local resources may be reused.
    FrameReleased = 0x010D,
    /// An application event (window, keyboard, pointer).
    Event = 0x010E,
    /// Changed fields of a distributed object.
    ObjectDelta = 0x010F,

    // ── Node (0x02xx) ────────────────────────────────────────────
    NodeInit = 0x0201,
    NodeInitReply = 0x0202,
    NodeExit = 0x0203,
    NodeExitReply = 0x0204,
    NodeStop = 0x0205,
}

impl TryFrom<u32> for CommandType {
    type Error = LatticeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(CommandType::Ping),
            0x0002 => Ok(CommandType::Hello),
            0x0003 => Ok(CommandType::PeerDisconnected),

            0x0101 => Ok(CommandType::StartInit),
            0x0102 => Ok(CommandType::StartInitReply),
            0x0103 => Ok(CommandType::FinishInit),
            0x0104 => Ok(CommandType::FinishInitReply),
            0x0105 => Ok(CommandType::Exit),
            0x0106 => Ok(CommandType::ExitReply),
            0x0107 => Ok(CommandType::StartFrame),
            0x0108 => Ok(CommandType::StartFrameReply),
            0x0109 => Ok(CommandType::FinishFrame),
            0x010A => Ok(CommandType::FinishFrameReply),
            0x010B => Ok(CommandType::FinishAllFrames),
            0x010C => Ok(CommandType::FinishAllFramesReply),
            0x010D => Ok(CommandType::FrameReleased),
            0x010E => Ok(CommandType::Event),
            0x010F => Ok(CommandType::ObjectDelta),

            0x0201 => Ok(CommandType::NodeInit),
            0x0202 => Ok(CommandType::NodeInitReply),
            0x0203 => Ok(CommandType::NodeExit),
            0x0204 => Ok(CommandType::NodeExitReply),
            0x0205 => Ok(CommandType::NodeStop),

            _ => Err(LatticeError::UnknownVariant {
                type_name: "CommandType",
                value: u64::from(value),
            }),
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl CommandType {
    /// Returns `true` for commands that answer an earlier request.
    pub fn is_reply(&self) -> bool {
        matches!(
            self,
            CommandType::StartInitReply
                | CommandType::FinishInitReply
                | CommandType::ExitReply
                | CommandType::StartFrameReply
                | CommandType::FinishFrameReply
                | CommandType::FinishAllFramesReply
                | CommandType::NodeInitReply
                | CommandType::NodeExitReply
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_conversion() {
        let cmds = [
            CommandType::Ping,
            CommandType::Hello,
            CommandType::StartInit,
            CommandType::FinishFrameReply,
            CommandType::ObjectDelta,
            CommandType::NodeStop,
        ];
        for cmd in cmds {
            assert_eq!(CommandType::try_from(cmd as u32).unwrap(), cmd);
        }
    }

    #[test]
    fn unknown_tag() {
        assert!(matches!(
            CommandType::try_from(0xDEAD),
            Err(LatticeError::UnknownVariant { value: 0xDEAD, .. })
        ));
    }

    #[test]
    fn replies_are_flagged() {
        assert!(CommandType::StartInitReply.is_reply());
        assert!(CommandType::NodeExitReply.is_reply());
        assert!(!CommandType::StartFrame.is_reply());
        assert!(!CommandType::Event.is_reply());
    }
}
