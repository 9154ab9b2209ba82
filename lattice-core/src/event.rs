//! Events flowing from render nodes back to the application.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::message::CommandType;
use crate::protocol::Payload;

/// Key code reported for the escape key.
pub const KEY_ESCAPE: u32 = 256;

bitflags! {
    /// Pointer buttons held down when a pointer event was generated.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PointerButtons: u32 {
        const BUTTON1 = 1 << 0;
        const BUTTON2 = 1 << 1;
        const BUTTON3 = 1 << 2;
        const BUTTON4 = 1 << 3;
        const BUTTON5 = 1 << 4;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    WindowClose,
    WindowResize { width: u32, height: u32 },
    KeyPress { key: u32 },
    KeyRelease { key: u32 },
    /// `buttons` holds raw [`PointerButtons`] bits.
    PointerButtonPress { x: i32, y: i32, buttons: u32 },
    PointerButtonRelease { x: i32, y: i32, buttons: u32 },
    PointerMotion { x: i32, y: i32, buttons: u32 },
    /// Application-defined event.
    User { tag: u32, data: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEvent {
    /// Node (or 0 for the application itself) that produced the event.
    pub originator: u32,
    pub kind: EventKind,
}

impl ConfigEvent {
    pub fn new(originator: u32, kind: EventKind) -> Self {
        Self { originator, kind }
    }

    pub fn window_close(originator: u32) -> Self {
        Self::new(originator, EventKind::WindowClose)
    }

    pub fn key_press(originator: u32, key: u32) -> Self {
        Self::new(originator, EventKind::KeyPress { key })
    }

    pub fn pointer_press(originator: u32, x: i32, y: i32, buttons: PointerButtons) -> Self {
        Self::new(
            originator,
            EventKind::PointerButtonPress {
                x,
                y,
                buttons: buttons.bits(),
            },
        )
    }

    /// Buttons of a pointer event; empty for everything else.
    pub fn buttons(&self) -> PointerButtons {
        match self.kind {
            EventKind::PointerButtonPress { buttons, .. }
            | EventKind::PointerButtonRelease { buttons, .. }
            | EventKind::PointerMotion { buttons, .. } => PointerButtons::from_bits_truncate(buttons),
            _ => PointerButtons::empty(),
        }
    }
}

impl Payload for ConfigEvent {
    const COMMAND: CommandType = CommandType::Event;
}
