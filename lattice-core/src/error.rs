//! Domain-specific error types for the lattice cluster protocol.
//!
//! All fallible operations return `Result<T, LatticeError>`. Malformed input
//! and protocol problems are typed and recoverable; only broken request
//! correlation (a contract violation by the caller) panics.

use std::time::Duration;
use thiserror::Error;

use crate::net::PeerId;
use crate::node::{NodeId, NodeState};

/// The canonical error type for the lattice protocol.
#[derive(Debug, Error)]
pub enum LatticeError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// Received bytes that do not start with the lattice magic sequence.
    #[error("invalid magic bytes: expected LTC0")]
    InvalidMagic,

    /// The protocol version carried by the peer is not supported.
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u16),

    /// The packet payload failed checksum verification.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// A packet or call sequence violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    // ── Packet Errors ────────────────────────────────────────────
    /// The payload exceeds the configured maximum size.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// Frame size exceeded the codec limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    // ── Connection Errors ────────────────────────────────────────
    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// No link is registered for the addressed peer.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),

    /// The connection description names a transport this build cannot open.
    #[error("unsupported connection type: {0}")]
    UnsupportedConnection(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// Encoding or decoding of a payload failed.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// A connection description could not be parsed.
    #[error("could not parse connection description: {0}")]
    InvalidDescription(String),

    // ── Dispatch Errors ──────────────────────────────────────────
    /// No handler is registered for the command type.
    #[error("unhandled command type {0:#x}")]
    UnhandledCommand(u32),

    /// The execution queue bound to a command type no longer exists.
    #[error("command queue '{0}' is closed")]
    QueueClosed(&'static str),

    // ── Lifecycle Errors ─────────────────────────────────────────
    /// A node was asked to make a transition its state does not allow.
    #[error("node {node}: cannot {action} from state {state}")]
    InvalidTransition {
        node: NodeId,
        action: &'static str,
        state: NodeState,
    },

    /// A `sync_*` call was made without a matching `send_*`.
    #[error("node {0}: no pending request to synchronize")]
    NoPendingRequest(NodeId),

    /// A node cannot be stopped or destroyed while resources still use it.
    #[error("node {0} is still in use")]
    NodeInUse(NodeId),

    /// No node with this identifier is attached to the config.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),

    /// Launching a node process failed.
    #[error("launch failed: {0}")]
    Launch(String),

    // ── Liveness Errors ──────────────────────────────────────────
    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// A blocking frame/init/exit operation exceeded the barrier deadline.
    #[error("{operation} timed out after {after:?}; stalled peers: {stalled:?}")]
    BarrierTimeout {
        operation: &'static str,
        after: Duration,
        stalled: Vec<PeerId>,
    },

    /// Catch-all for errors that do not fit another variant.
    #[error("{0}")]
    Other(String),
}

// ── Convenient From implementations ──────────────────────────────

impl From<String> for LatticeError {
    fn from(s: String) -> Self {
        LatticeError::Other(s)
    }
}

impl From<&str> for LatticeError {
    fn from(s: &str) -> Self {
        LatticeError::Other(s.to_string())
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for LatticeError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        LatticeError::ChannelClosed
    }
}

impl From<Box<bincode::ErrorKind>> for LatticeError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        LatticeError::Encoding(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = LatticeError::InvalidMagic;
        assert!(e.to_string().contains("magic"));

        let e = LatticeError::PayloadTooLarge {
            size: 1000,
            max: 500,
        };
        assert!(e.to_string().contains("1000"));
        assert!(e.to_string().contains("500"));
    }

    #[test]
    fn barrier_timeout_names_stalled_peers() {
        let e = LatticeError::BarrierTimeout {
            operation: "finish_frame",
            after: Duration::from_millis(20),
            stalled: vec![3, 7],
        };
        let text = e.to_string();
        assert!(text.contains("finish_frame"));
        assert!(text.contains("[3, 7]"));
    }

    #[test]
    fn invalid_transition_mentions_state() {
        let e = LatticeError::InvalidTransition {
            node: 2,
            action: "init",
            state: NodeState::Stopped,
        };
        assert!(e.to_string().contains("Stopped"));
    }

    #[test]
    fn from_string() {
        let e: LatticeError = "something broke".into();
        assert!(matches!(e, LatticeError::Other(_)));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: LatticeError = io_err.into();
        assert!(matches!(e, LatticeError::Connection(_)));
    }
}
