//! Render node lifecycle as seen from the coordinator.
//!
//! A [`Node`] stands for one worker process. The coordinator drives it
//! through launch, connection and initialisation with validated
//! transitions that return `Result` instead of panicking.

mod factory;

pub use factory::{DefaultNodeFactory, NodeFactory};

use std::fmt;

use tracing::{debug, warn};

use crate::error::LatticeError;
use crate::net::{ConnectionDescription, PeerId, Transport};
use crate::protocol::{NodeExit, NodeInit, NodeStop, Payload};
use crate::session::RequestHandler;

pub type NodeId = u32;

/// Identifies a rendering resource attached to a node.
pub type PipeId = u32;

// ── NodeState ────────────────────────────────────────────────────

/// ```text
///  Stopped ──► Launched ──► Connected ──► Listening ──► Initialising ──► Initialised
///     ▲            │             │             │              │               │
///     └────────────┴─────────────┴─────────────┴──────────────┴───────────────┘
///                         exit / stop / launch failure / link lost
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum NodeState {
    #[default]
    Stopped,
    /// Process started, link not yet established.
    Launched,
    /// Link established, waiting for the worker's hello.
    Connected,
    /// Worker announced itself and accepts commands.
    Listening,
    Initialising,
    Initialised,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "Stopped",
            Self::Launched => "Launched",
            Self::Connected => "Connected",
            Self::Listening => "Listening",
            Self::Initialising => "Initialising",
            Self::Initialised => "Initialised",
        };
        f.write_str(name)
    }
}

// ── Node ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    description: ConnectionDescription,
    state: NodeState,
    peer: Option<PeerId>,
    pipes: Vec<PipeId>,
    used: u32,
    pending_request: Option<u64>,
    /// Highest frame whose inputs this node no longer needs.
    released_frame: u32,
    error: Option<String>,
}

impl Node {
    pub fn new(id: NodeId, description: ConnectionDescription) -> Self {
        Self {
            id,
            name: format!("node-{id}"),
            description,
            state: NodeState::Stopped,
            peer: None,
            pipes: Vec::new(),
            used: 0,
            pending_request: None,
            released_frame: 0,
            error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &ConnectionDescription {
        &self.description
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn peer(&self) -> Option<PeerId> {
        self.peer
    }

    pub fn pending_request(&self) -> Option<u64> {
        self.pending_request
    }

    pub fn released_frame(&self) -> u32 {
        self.released_frame
    }

    /// Last error reported by the worker, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.state == NodeState::Initialised
    }

    // ── Usage ────────────────────────────────────────────────────

    pub fn pipes(&self) -> &[PipeId] {
        &self.pipes
    }

    pub fn add_pipe(&mut self, pipe: PipeId) {
        self.pipes.push(pipe);
        self.ref_used();
    }

    pub fn remove_pipe(&mut self, pipe: PipeId) -> bool {
        let Some(index) = self.pipes.iter().position(|&p| p == pipe) else {
            return false;
        };
        self.pipes.remove(index);
        self.unref_used();
        true
    }

    pub fn ref_used(&mut self) {
        self.used += 1;
    }

    pub fn unref_used(&mut self) {
        debug_assert!(self.used > 0, "node {} usage underflow", self.id);
        self.used = self.used.saturating_sub(1);
    }

    pub fn is_used(&self) -> bool {
        self.used > 0
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Valid from: `Stopped`.
    pub fn launched(&mut self) -> Result<(), LatticeError> {
        self.expect(NodeState::Stopped, "launch")?;
        self.peer = None;
        self.released_frame = 0;
        self.error = None;
        self.state = NodeState::Launched;
        Ok(())
    }

    /// Valid from: `Launched`.
    pub fn connected(&mut self, peer: PeerId) -> Result<(), LatticeError> {
        self.expect(NodeState::Launched, "connect")?;
        self.peer = Some(peer);
        self.state = NodeState::Connected;
        Ok(())
    }

    /// Valid from: `Connected`.
    pub fn listening(&mut self) -> Result<(), LatticeError> {
        self.expect(NodeState::Connected, "listen")?;
        self.state = NodeState::Listening;
        Ok(())
    }

    /// Send the init request and move to `Initialising`.
    ///
    /// Valid from: `Listening`. Returns the request id to wait on.
    pub fn send_init(
        &mut self,
        init_id: u32,
        requests: &mut RequestHandler,
        transport: &dyn Transport,
    ) -> Result<u64, LatticeError> {
        self.expect(NodeState::Listening, "init")?;
        let request = self.send_request(
            &NodeInit {
                node_id: self.id,
                init_id,
            },
            requests,
            transport,
        )?;
        self.state = NodeState::Initialising;
        Ok(request)
    }

    /// Apply the init reply: `Initialised` on success, `Stopped` otherwise.
    pub fn finish_init(&mut self, ok: bool) {
        self.pending_request = None;
        if ok {
            self.state = NodeState::Initialised;
            debug!("node {} initialised", self.id);
        } else {
            warn!(
                "node {} failed to initialise: {}",
                self.id,
                self.error.as_deref().unwrap_or("no reason given")
            );
            self.state = NodeState::Stopped;
        }
    }

    /// Send the exit request.
    ///
    /// Valid from: `Initialised`, and only while nothing uses the node.
    pub fn send_exit(
        &mut self,
        requests: &mut RequestHandler,
        transport: &dyn Transport,
    ) -> Result<u64, LatticeError> {
        if self.is_used() {
            return Err(LatticeError::NodeInUse(self.id));
        }
        self.expect(NodeState::Initialised, "exit")?;
        if self.pending_request.is_some() {
            return Err(LatticeError::ProtocolViolation(
                "node exit requested while another request is pending",
            ));
        }
        self.send_request(&NodeExit { node_id: self.id }, requests, transport)
    }

    /// Apply the exit reply. The node is stopped either way.
    pub fn finish_exit(&mut self, ok: bool) {
        self.pending_request = None;
        if !ok {
            warn!("node {} reported an unclean exit", self.id);
        }
        self.state = NodeState::Stopped;
    }

    /// Ask the worker process to terminate and mark the node stopped.
    ///
    /// Returns the request that was pending, so the caller can abandon it.
    pub fn stop(&mut self, transport: &dyn Transport) -> Result<Option<u64>, LatticeError> {
        if self.is_used() {
            return Err(LatticeError::NodeInUse(self.id));
        }
        if let Some(peer) = self.peer {
            let packet = NodeStop { node_id: self.id }.to_command(0)?;
            if let Err(e) = transport.send(peer, packet) {
                debug!("node {} stop not delivered: {e}", self.id);
            }
        }
        Ok(self.force_stop())
    }

    /// Reset to `Stopped` without telling the worker, e.g. after its link
    /// was lost. Returns the request that was pending.
    pub fn force_stop(&mut self) -> Option<u64> {
        self.state = NodeState::Stopped;
        self.peer = None;
        self.pending_request.take()
    }

    pub(crate) fn set_error(&mut self, error: Option<String>) {
        if error.is_some() {
            self.error = error;
        }
    }

    /// Record that the worker consumed the inputs of `frame`.
    pub(crate) fn release_frame(&mut self, frame: u32) {
        self.released_frame = self.released_frame.max(frame);
    }

    fn send_request<P: Payload>(
        &mut self,
        payload: &P,
        requests: &mut RequestHandler,
        transport: &dyn Transport,
    ) -> Result<u64, LatticeError> {
        let peer = self.peer.ok_or(LatticeError::InvalidTransition {
            node: self.id,
            action: "send",
            state: self.state,
        })?;
        let request = requests.register_request();
        let sent = payload
            .to_command(request)
            .and_then(|packet| transport.send(peer, packet));
        if let Err(e) = sent {
            requests.abandon_request(request);
            return Err(e);
        }
        self.pending_request = Some(request);
        Ok(request)
    }

    fn expect(&self, state: NodeState, action: &'static str) -> Result<(), LatticeError> {
        if self.state == state {
            Ok(())
        } else {
            Err(LatticeError::InvalidTransition {
                node: self.id,
                action,
                state: self.state,
            })
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CommandType;
    use crate::net::{Link, PeerTable};

    fn listening_node(table: &PeerTable) -> (Node, Link) {
        let (local, remote) = Link::pair();
        let peer = table.add_link(local.tx);
        let mut node = Node::new(1, ConnectionDescription::default());
        node.launched().unwrap();
        node.connected(peer).unwrap();
        node.listening().unwrap();
        (node, remote)
    }

    #[tokio::test]
    async fn happy_path_lifecycle() {
        let table = PeerTable::new();
        let mut requests = RequestHandler::new();
        let (mut node, mut remote) = listening_node(&table);

        let request = node.send_init(7, &mut requests, &table).unwrap();
        assert_eq!(node.state(), NodeState::Initialising);
        assert_eq!(node.pending_request(), Some(request));

        let packet = remote.rx.recv().await.unwrap();
        assert_eq!(packet.command().unwrap(), CommandType::NodeInit);
        assert_eq!(packet.request_id(), request);

        node.finish_init(true);
        assert!(node.is_running());
        assert_eq!(node.pending_request(), None);

        node.send_exit(&mut requests, &table).unwrap();
        node.finish_exit(true);
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[test]
    fn init_requires_listening() {
        let table = PeerTable::new();
        let mut requests = RequestHandler::new();
        let mut node = Node::new(3, ConnectionDescription::default());
        let err = node.send_init(1, &mut requests, &table).unwrap_err();
        assert!(matches!(
            err,
            LatticeError::InvalidTransition {
                node: 3,
                state: NodeState::Stopped,
                ..
            }
        ));
        assert_eq!(requests.pending_count(), 0);
    }

    #[test]
    fn failed_init_returns_to_stopped() {
        let table = PeerTable::new();
        let mut requests = RequestHandler::new();
        let (mut node, _remote) = listening_node(&table);
        node.send_init(1, &mut requests, &table).unwrap();
        node.set_error(Some("no display".into()));
        node.finish_init(false);
        assert_eq!(node.state(), NodeState::Stopped);
        assert_eq!(node.error(), Some("no display"));
    }

    #[test]
    fn used_node_cannot_exit_or_stop() {
        let table = PeerTable::new();
        let mut requests = RequestHandler::new();
        let (mut node, _remote) = listening_node(&table);
        node.send_init(1, &mut requests, &table).unwrap();
        node.finish_init(true);

        node.add_pipe(4);
        assert!(node.is_used());
        assert!(matches!(
            node.send_exit(&mut requests, &table),
            Err(LatticeError::NodeInUse(1))
        ));
        assert!(matches!(node.stop(&table), Err(LatticeError::NodeInUse(1))));

        assert!(node.remove_pipe(4));
        assert!(!node.remove_pipe(4));
        assert!(!node.is_used());
        assert_eq!(node.stop(&table).unwrap(), None);
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[test]
    fn send_failure_leaves_state_untouched() {
        let table = PeerTable::new();
        let mut requests = RequestHandler::new();
        let (mut node, remote) = listening_node(&table);
        drop(remote);
        assert!(node.send_init(1, &mut requests, &table).is_err());
        assert_eq!(node.state(), NodeState::Listening);
        assert_eq!(node.pending_request(), None);
        assert_eq!(requests.pending_count(), 0);
    }

    #[test]
    fn released_frame_is_monotonic() {
        let mut node = Node::new(1, ConnectionDescription::default());
        node.release_frame(4);
        node.release_frame(2);
        assert_eq!(node.released_frame(), 4);
    }

    #[test]
    fn display_format() {
        assert_eq!(NodeState::Stopped.to_string(), "Stopped");
        assert_eq!(NodeState::Initialising.to_string(), "Initialising");
    }
}
