//! Per-packet protocol flags carried in the header.

use bitflags::bitflags;

bitflags! {
    /// Bit set stored in the `flags` field of a [`PacketHeader`].
    ///
    /// [`PacketHeader`]: crate::net::PacketHeader
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ProtocolFlags: u16 {
        /// The packet answers an earlier request with the same id.
        const REPLY = 1 << 0;
        /// Synthesized locally; never sent over a link.
        const LOCAL = 1 << 1;
    }
}
