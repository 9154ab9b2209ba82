//! Wire format, links and peer addressing.

pub mod codec;
pub mod connection;
pub mod description;
pub mod header;
pub mod packet;
pub mod transport;

pub use codec::LatticeCodec;
pub use connection::{Connection, Link, PacketReceiver, PacketSender};
pub use description::{ConnectionDescription, ConnectionType};
pub use header::PacketHeader;
pub use packet::Packet;
pub use transport::{LOCAL_PEER, PeerId, PeerTable, Transport, spawn_inbound};
