//! # lattice-core
//!
//! Synchronization engine for clusters that render frames in lockstep.
//!
//! This crate contains:
//! - **Wire layer**: `PacketHeader`, `Packet`, `CommandType`, `LatticeCodec`,
//!   `Connection` and the `ConnectionDescription` text format
//! - **Dispatch**: `Session`, `CommandQueue`, `RequestHandler` and
//!   `BarrierCollector` for request/reply correlation
//! - **Coordinator**: `Config`, the frame pipeline and node lifecycle
//! - **Worker**: `Worker`, which executes commands against a `FrameRenderer`
//! - **Launchers**: `LocalLauncher` and `ProcessLauncher`
//! - **Sync**: `TimedLock`, a binary lock with bounded-wait acquisition
//! - **Error**: `LatticeError`, a typed `thiserror` hierarchy

pub mod config;
pub mod error;
pub mod event;
pub mod flags;
pub mod launch;
pub mod message;
pub mod net;
pub mod node;
pub mod object;
pub mod protocol;
pub mod render;
pub mod session;
pub mod sync;
pub mod worker;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use config::Config;
pub use error::LatticeError;
pub use event::{ConfigEvent, EventKind, KEY_ESCAPE, PointerButtons};
pub use flags::ProtocolFlags;
pub use launch::{LocalLauncher, NodeLauncher, ProcessLauncher, expand_command};
pub use message::CommandType;
pub use net::header::{HEADER_LENGTH, PROTOCOL_VERSION};
pub use net::packet::{MAX_FRAME_SIZE, MAX_PAYLOAD_SIZE};
pub use net::{
    Connection, ConnectionDescription, ConnectionType, LOCAL_PEER, LatticeCodec, Link, Packet,
    PacketHeader, PeerId, PeerTable, Transport,
};
pub use node::{DefaultNodeFactory, Node, NodeFactory, NodeId, NodeState, PipeId};
pub use object::{DirtyBits, Distributable, HeadMatrix, Named};
pub use render::{FrameRenderer, IdCache, NullRenderer, ResourceCache};
pub use session::{Command, RequestHandler, RequestResult, Session};
pub use sync::TimedLock;
pub use worker::{Worker, WorkerExit};
