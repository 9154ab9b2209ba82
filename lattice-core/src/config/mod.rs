//! Coordinator side of the frame pipeline.
//!
//! [`Config`] owns the frame counters, the attached [`Node`]s and the event
//! queue. It is a single-writer actor: every reply from the cluster lands on
//! one of its two command queues and is applied by [`Config`] itself while
//! it pumps them. Blocking operations (`start_init`, `finish_frame`, `exit`
//! and friends) are loops that pump until a predicate over that state holds.
//!
//! ```text
//!   unlocked_frame  ── highest frame whose local inputs may be reused
//!   finished_frame  ── highest frame every peer finished rendering
//!   current_frame   ── highest frame started
//!
//!   finished_frame <= unlocked_frame <= current_frame
//!   current_frame - finished_frame  <= latency   (after finish_frame)
//! ```

mod events;
mod frames;
mod handlers;
mod nodes;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::LatticeError;
use crate::event::ConfigEvent;
use crate::net::{Packet, PeerId, Transport};
use crate::node::{Node, NodeFactory, NodeId};
use crate::object::HeadMatrix;
use crate::protocol::Payload;
use crate::session::{
    BarrierCollector, BarrierOutcome, CommandQueue, Queued, RequestHandler, RequestResult, Session,
};

pub struct Config {
    session: Arc<Session<Config>>,
    queue: CommandQueue<Config>,
    event_queue: CommandQueue<Config>,
    transport: Arc<dyn Transport>,
    factory: Box<dyn NodeFactory>,
    requests: RequestHandler,
    barriers: BarrierCollector,

    latency: u32,
    current_frame: u32,
    unlocked_frame: u32,
    finished_frame: u32,
    /// Last finished frame reported by each peer taking part in the run.
    members: BTreeMap<PeerId, u32>,
    /// Start-frame requests not yet collected, with the frame they started.
    frame_starts: BTreeMap<u64, u32>,

    nodes: Vec<Node>,
    next_node_id: NodeId,

    events: VecDeque<ConfigEvent>,
    running: bool,
    error: Option<String>,

    head: HeadMatrix,
    head_id: Option<u32>,
    next_object_id: u32,

    barrier_timeout: Option<Duration>,
}

impl Config {
    pub fn new(transport: Arc<dyn Transport>, factory: Box<dyn NodeFactory>) -> Self {
        let queue = CommandQueue::new("config");
        let event_queue = CommandQueue::new("config events");
        let session = Arc::new(Self::build_session(&queue.sender(), &event_queue.sender()));

        Self {
            session,
            queue,
            event_queue,
            transport,
            factory,
            requests: RequestHandler::new(),
            barriers: BarrierCollector::new(),
            latency: 1,
            current_frame: 0,
            unlocked_frame: 0,
            finished_frame: 0,
            members: BTreeMap::new(),
            frame_starts: BTreeMap::new(),
            nodes: Vec::new(),
            next_node_id: 1,
            events: VecDeque::new(),
            running: false,
            error: None,
            head: HeadMatrix::new(),
            head_id: None,
            next_object_id: 1,
            barrier_timeout: None,
        }
    }

    /// The dispatch table inbound links deliver into.
    pub fn session(&self) -> Arc<Session<Config>> {
        Arc::clone(&self.session)
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn latency(&self) -> u32 {
        self.latency
    }

    /// Takes effect at the next `start_init`.
    pub fn set_latency(&mut self, latency: u32) {
        self.latency = latency;
    }

    pub fn current_frame(&self) -> u32 {
        self.current_frame
    }

    pub fn unlocked_frame(&self) -> u32 {
        self.unlocked_frame
    }

    pub fn finished_frame(&self) -> u32 {
        self.finished_frame
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Ask the application loop to wind down.
    pub fn stop_running(&mut self) {
        self.running = false;
    }

    /// Reason for the last failed lifecycle operation.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Peers taking part in the current run.
    pub fn members(&self) -> Vec<PeerId> {
        self.members.keys().copied().collect()
    }

    pub fn barrier_timeout(&self) -> Option<Duration> {
        self.barrier_timeout
    }

    /// Bound every blocking operation. `None` waits forever.
    pub fn set_barrier_timeout(&mut self, timeout: Option<Duration>) {
        self.barrier_timeout = timeout;
    }

    pub fn head(&self) -> &HeadMatrix {
        &self.head
    }

    /// Peers something is currently waiting on: open barriers, members
    /// behind the latency window, and nodes that have not released the
    /// current frame.
    pub fn stalled_peers(&self) -> Vec<PeerId> {
        let behind = self.current_frame.saturating_sub(self.latency);
        let mut stalled: BTreeSet<PeerId> = self.barriers.stalled_peers();
        stalled.extend(
            self.members
                .iter()
                .filter(|&(_, &finished)| finished < behind)
                .map(|(&peer, _)| peer),
        );
        stalled.extend(
            self.rendering_nodes()
                .filter(|node| node.released_frame() < self.current_frame)
                .filter_map(Node::peer),
        );
        stalled.into_iter().collect()
    }

    // ── Queue pumping ────────────────────────────────────────────

    /// Apply exactly one queued command, waiting for one if necessary.
    ///
    /// Replies are preferred over events.
    pub async fn process_command(&mut self) -> Result<(), LatticeError> {
        let queued = tokio::select! {
            biased;
            Some(queued) = self.queue.recv() => queued,
            Some(queued) = self.event_queue.recv() => queued,
            else => return Err(LatticeError::ChannelClosed),
        };
        self.invoke(queued);
        Ok(())
    }

    fn invoke(&mut self, queued: Queued<Config>) {
        let id = queued.command().packet().command_id();
        let from = queued.command().from();
        if let Err(e) = queued.invoke(self) {
            warn!("command {id:#x} from peer {from} failed: {e}");
        }
    }

    /// Pump until `done` holds, bounded by the barrier timeout.
    async fn pump_until(
        &mut self,
        operation: &'static str,
        done: impl Fn(&Self) -> bool,
    ) -> Result<(), LatticeError> {
        self.pump_until_deadline(operation, self.barrier_timeout, done)
            .await
    }

    async fn pump_until_deadline(
        &mut self,
        operation: &'static str,
        timeout: Option<Duration>,
        done: impl Fn(&Self) -> bool,
    ) -> Result<(), LatticeError> {
        let deadline = timeout.map(|after| (after, Instant::now() + after));
        while !done(self) {
            let Some((after, at)) = deadline else {
                self.process_command().await?;
                continue;
            };
            match tokio::time::timeout_at(at, self.process_command()).await {
                Ok(processed) => processed?,
                Err(_) => {
                    let stalled = self.stalled_peers();
                    warn!("{operation} timed out after {after:?}, stalled peers {stalled:?}");
                    return Err(LatticeError::BarrierTimeout {
                        operation,
                        after,
                        stalled,
                    });
                }
            }
        }
        Ok(())
    }

    /// Pump until request `id` is served and take its result.
    ///
    /// On failure the request is abandoned so a late reply is dropped.
    async fn wait_request(
        &mut self,
        id: u64,
        operation: &'static str,
    ) -> Result<RequestResult, LatticeError> {
        if let Err(e) = self
            .pump_until(operation, |config| config.requests.is_served(id))
            .await
        {
            self.requests.abandon_request(id);
            self.barriers.cancel(id);
            return Err(e);
        }
        self.requests
            .wait_request(id)
            .ok_or(LatticeError::ProtocolViolation("served request has no result"))
    }

    // ── Barriers ─────────────────────────────────────────────────

    /// Send `payload` to every member under a fresh request id and start
    /// collecting their replies.
    fn open_barrier(
        &mut self,
        operation: &'static str,
        payload: &impl Payload,
    ) -> Result<u64, LatticeError> {
        let id = self.requests.register_request();
        let packet = match payload.to_command(id) {
            Ok(packet) => packet,
            Err(e) => {
                self.requests.abandon_request(id);
                return Err(e);
            }
        };
        let reached = self.broadcast(&packet);
        if let Some(outcome) = self.barriers.open(id, operation, reached) {
            self.complete_barrier(id, outcome);
        }
        Ok(id)
    }

    /// Run a barrier to completion and return its combined result.
    async fn barrier(
        &mut self,
        operation: &'static str,
        payload: &impl Payload,
    ) -> Result<bool, LatticeError> {
        let id = self.open_barrier(operation, payload)?;
        let result = self.wait_request(id, operation).await?;
        Ok(result.as_bool().unwrap_or(false))
    }

    fn complete_barrier(&mut self, id: u64, outcome: BarrierOutcome) {
        if let Some(message) = outcome.error_message() {
            self.error = Some(message);
        }
        self.requests
            .serve_request(id, RequestResult::Bool(outcome.result));
    }

    /// Send to every member; members that cannot be reached are dropped.
    fn broadcast(&mut self, packet: &Packet) -> Vec<PeerId> {
        let members: Vec<PeerId> = self.members.keys().copied().collect();
        let mut reached = Vec::with_capacity(members.len());
        for peer in members {
            match self.transport.send(peer, packet.clone()) {
                Ok(()) => reached.push(peer),
                Err(e) => {
                    warn!("peer {peer} unreachable: {e}");
                    self.peer_lost(peer);
                }
            }
        }
        trace!("sent {:#x} to {} peer(s)", packet.command_id(), reached.len());
        reached
    }

    // ── Frame bookkeeping ────────────────────────────────────────

    fn rendering_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|node| node.is_running() && node.peer().is_some())
    }

    fn update_finished(&mut self) {
        let finished = self
            .members
            .values()
            .copied()
            .min()
            .unwrap_or(self.current_frame)
            .min(self.current_frame);
        if finished > self.finished_frame {
            self.finished_frame = finished;
            debug!("finished frame {finished}");
        }
        if self.finished_frame > self.unlocked_frame {
            warn!(
                "frame {} finished before it was unlocked",
                self.finished_frame
            );
            self.unlocked_frame = self.finished_frame;
        }
    }

    fn update_unlocked(&mut self) {
        let released = self.rendering_nodes().map(Node::released_frame).min();
        if let Some(frame) = released {
            let frame = frame.min(self.current_frame);
            if frame > self.unlocked_frame {
                self.unlocked_frame = frame;
                trace!("unlocked frame {frame}");
            }
        }
    }

    /// Forget a peer: fail what waits on it and stop counting its frames.
    fn peer_lost(&mut self, peer: PeerId) {
        if self.members.remove(&peer).is_some() {
            warn!("peer {peer} left the cluster");
        }
        for (id, outcome) in self.barriers.peer_lost(peer) {
            self.complete_barrier(id, outcome);
        }
        for node in self.nodes.iter_mut().filter(|node| node.peer() == Some(peer)) {
            warn!("node {} lost its link", node.id());
            node.set_error(Some(format!("peer {peer} disconnected")));
            if let Some(request) = node.force_stop() {
                if self.requests.is_pending(request) {
                    self.requests
                        .serve_request(request, RequestResult::Bool(false));
                }
            }
        }
        self.update_finished();
        self.update_unlocked();
    }
}
