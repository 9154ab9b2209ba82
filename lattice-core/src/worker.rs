//! Worker-side runtime.
//!
//! A worker owns one link to the coordinator. Inbound commands are decoded
//! by the handlers of its [`Session`] into [`Job`]s, which the run loop
//! executes strictly in arrival order against a [`FrameRenderer`]. Replies
//! go back over the same link.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::LatticeError;
use crate::message::CommandType;
use crate::net::header::PROTOCOL_VERSION;
use crate::net::{Link, Packet, PacketReceiver, PacketSender, PeerId, spawn_inbound};
use crate::node::NodeId;
use crate::object::{DirtyBits, Distributable, HeadMatrix};
use crate::protocol::{
    ExitReply, FinishAllFrames, FinishAllFramesReply, FinishFrame, FinishFrameReply, FinishInit,
    FinishInitReply, FrameReleased, Hello, NodeExit, NodeExitReply, NodeInit, NodeInitReply,
    NodeStop, ObjectDelta, Payload, StartFrame, StartFrameReply, StartInit, StartInitReply,
};
use crate::render::FrameRenderer;
use crate::session::{Command, CommandQueue, CommandResult, QueueSender, Session};

/// Peer id under which the coordinator's commands are dispatched.
const COORDINATOR: PeerId = 1;

/// One unit of work, in the order the coordinator sent it.
#[derive(Debug)]
enum Job {
    StartInit { request: u64, init: StartInit },
    FinishInit { request: u64, init: FinishInit },
    Exit { request: u64 },
    Frame { request: u64, start: StartFrame },
    FinishFrame { request: u64 },
    FinishAllFrames { request: u64 },
    ObjectDelta(ObjectDelta),
    NodeInit { request: u64, init: NodeInit },
    NodeExit { request: u64, node_id: NodeId },
    NodeStop { node_id: NodeId },
}

/// Why [`Worker::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The coordinator sent `NodeStop`.
    Stopped,
    /// The link to the coordinator closed.
    Disconnected,
}

pub struct Worker {
    name: String,
    outbound: PacketSender,
    renderer: Box<dyn FrameRenderer>,
    jobs: VecDeque<Job>,
    head: Option<(u32, HeadMatrix)>,
    finished_frame: u32,
    initialised: bool,
    exit: Option<WorkerExit>,
}

impl Worker {
    pub fn new(
        name: impl Into<String>,
        outbound: PacketSender,
        renderer: Box<dyn FrameRenderer>,
    ) -> Self {
        Self {
            name: name.into(),
            outbound,
            renderer,
            jobs: VecDeque::new(),
            head: None,
            finished_frame: 0,
            initialised: false,
            exit: None,
        }
    }

    /// Run a worker over `link` on a background task.
    pub fn spawn(
        name: impl Into<String>,
        link: Link,
        renderer: Box<dyn FrameRenderer>,
    ) -> JoinHandle<Result<WorkerExit, LatticeError>> {
        let Link { tx, rx } = link;
        let worker = Self::new(name, tx, renderer);
        tokio::spawn(worker.run(rx))
    }

    /// Serve the coordinator until it stops this worker or the link closes.
    pub async fn run(mut self, inbound: PacketReceiver) -> Result<WorkerExit, LatticeError> {
        let mut queue = CommandQueue::new("worker");
        let session = Arc::new(Self::session(&self.name, &queue.sender()));
        let pump = spawn_inbound(COORDINATOR, inbound, session, || {});

        self.send(
            Hello {
                name: self.name.clone(),
                version: PROTOCOL_VERSION,
            }
            .to_command(0)?,
        )?;
        info!("worker '{}' ready", self.name);

        let outcome = self.serve(&mut queue).await;
        pump.abort();
        if self.initialised {
            self.renderer.exit().await;
        }
        info!("worker '{}' finished: {outcome:?}", self.name);
        outcome
    }

    async fn serve(&mut self, queue: &mut CommandQueue<Self>) -> Result<WorkerExit, LatticeError> {
        loop {
            if let Some(exit) = self.exit {
                return Ok(exit);
            }
            let Some(queued) = queue.recv().await else {
                return Ok(WorkerExit::Disconnected);
            };
            if let Err(e) = queued.invoke(self) {
                warn!("worker '{}': {e}", self.name);
            }
            while let Some(job) = self.jobs.pop_front() {
                self.execute(job).await?;
            }
        }
    }

    fn session(name: &str, queue: &QueueSender<Self>) -> Session<Self> {
        let mut session = Session::new(format!("worker '{name}'"));
        session.register_handler(CommandType::StartInit, Self::cmd_start_init, queue);
        session.register_handler(CommandType::FinishInit, Self::cmd_finish_init, queue);
        session.register_handler(CommandType::Exit, Self::cmd_exit, queue);
        session.register_handler(CommandType::StartFrame, Self::cmd_start_frame, queue);
        session.register_handler(CommandType::FinishFrame, Self::cmd_finish_frame, queue);
        session.register_handler(CommandType::FinishAllFrames, Self::cmd_finish_all_frames, queue);
        session.register_handler(CommandType::ObjectDelta, Self::cmd_object_delta, queue);
        session.register_handler(CommandType::NodeInit, Self::cmd_node_init, queue);
        session.register_handler(CommandType::NodeExit, Self::cmd_node_exit, queue);
        session.register_handler(CommandType::NodeStop, Self::cmd_node_stop, queue);
        session.register_handler(CommandType::PeerDisconnected, Self::cmd_disconnected, queue);
        session
    }

    // ── Command handlers ─────────────────────────────────────────

    fn cmd_start_init(&mut self, command: Command) -> CommandResult {
        let init = command.payload::<StartInit>()?;
        self.jobs.push_back(Job::StartInit {
            request: command.request_id(),
            init,
        });
        Ok(())
    }

    fn cmd_finish_init(&mut self, command: Command) -> CommandResult {
        let init = command.payload::<FinishInit>()?;
        self.jobs.push_back(Job::FinishInit {
            request: command.request_id(),
            init,
        });
        Ok(())
    }

    fn cmd_exit(&mut self, command: Command) -> CommandResult {
        self.jobs.push_back(Job::Exit {
            request: command.request_id(),
        });
        Ok(())
    }

    fn cmd_start_frame(&mut self, command: Command) -> CommandResult {
        let start = command.payload::<StartFrame>()?;
        self.jobs.push_back(Job::Frame {
            request: command.request_id(),
            start,
        });
        Ok(())
    }

    fn cmd_finish_frame(&mut self, command: Command) -> CommandResult {
        let finish = command.payload::<FinishFrame>()?;
        debug!("coordinator finishing frame {}", finish.frame_number);
        self.jobs.push_back(Job::FinishFrame {
            request: command.request_id(),
        });
        Ok(())
    }

    fn cmd_finish_all_frames(&mut self, command: Command) -> CommandResult {
        let finish = command.payload::<FinishAllFrames>()?;
        debug!("coordinator finishing all frames up to {}", finish.frame_number);
        self.jobs.push_back(Job::FinishAllFrames {
            request: command.request_id(),
        });
        Ok(())
    }

    fn cmd_object_delta(&mut self, command: Command) -> CommandResult {
        let delta = command.payload::<ObjectDelta>()?;
        self.jobs.push_back(Job::ObjectDelta(delta));
        Ok(())
    }

    fn cmd_node_init(&mut self, command: Command) -> CommandResult {
        let init = command.payload::<NodeInit>()?;
        self.jobs.push_back(Job::NodeInit {
            request: command.request_id(),
            init,
        });
        Ok(())
    }

    fn cmd_node_exit(&mut self, command: Command) -> CommandResult {
        let exit = command.payload::<NodeExit>()?;
        self.jobs.push_back(Job::NodeExit {
            request: command.request_id(),
            node_id: exit.node_id,
        });
        Ok(())
    }

    fn cmd_node_stop(&mut self, command: Command) -> CommandResult {
        let stop = command.payload::<NodeStop>()?;
        self.jobs.push_back(Job::NodeStop {
            node_id: stop.node_id,
        });
        Ok(())
    }

    fn cmd_disconnected(&mut self, _command: Command) -> CommandResult {
        info!("worker '{}': coordinator link closed", self.name);
        self.exit.get_or_insert(WorkerExit::Disconnected);
        Ok(())
    }

    // ── Job execution ────────────────────────────────────────────

    async fn execute(&mut self, job: Job) -> Result<(), LatticeError> {
        match job {
            Job::StartInit { request, init } => {
                debug!("init {} with latency {}", init.init_id, init.latency);
                self.finished_frame = 0;
                let (result, error) = split(self.renderer.init(init.init_id).await);
                self.send(StartInitReply { result, error }.to_reply(request)?)
            }
            Job::FinishInit { request, init } => {
                let mut head = HeadMatrix::new();
                let (result, error) = match head.deserialize(DirtyBits::ALL, &init.head) {
                    Ok(()) => {
                        head.clear_dirty();
                        self.head = Some((init.head_id, head));
                        self.initialised = true;
                        (true, None)
                    }
                    Err(e) => (false, Some(e.to_string())),
                };
                self.send(FinishInitReply { result, error }.to_reply(request)?)
            }
            Job::Exit { request } => {
                let result = self.renderer.exit().await;
                self.head = None;
                self.initialised = false;
                self.send(ExitReply { result, error: None }.to_reply(request)?)
            }
            Job::Frame { request, start } => self.render_frame(request, start).await,
            Job::FinishFrame { request } => self.send(
                FinishFrameReply {
                    frame_number: self.finished_frame,
                }
                .to_reply(request)?,
            ),
            Job::FinishAllFrames { request } => self.send(
                FinishAllFramesReply {
                    frame_number: self.finished_frame,
                }
                .to_reply(request)?,
            ),
            Job::ObjectDelta(delta) => {
                match self.head.as_mut() {
                    Some((id, head)) if *id == delta.object_id => {
                        let bits = DirtyBits::from_bits_truncate(delta.dirty);
                        if let Err(e) = head.deserialize(bits, &delta.data) {
                            warn!("object {}: bad delta: {e}", delta.object_id);
                        }
                    }
                    _ => debug!("delta for unmapped object {}", delta.object_id),
                }
                Ok(())
            }
            Job::NodeInit { request, init } => {
                let (result, error) = split(self.renderer.init_node(init.node_id).await);
                self.send(
                    NodeInitReply {
                        node_id: init.node_id,
                        result,
                        error,
                    }
                    .to_reply(request)?,
                )
            }
            Job::NodeExit { request, node_id } => {
                let result = self.renderer.exit_node(node_id).await;
                self.send(NodeExitReply { node_id, result }.to_reply(request)?)
            }
            Job::NodeStop { node_id } => {
                info!("worker '{}': stopped by node {node_id}", self.name);
                self.exit = Some(WorkerExit::Stopped);
                self.jobs.clear();
                Ok(())
            }
        }
    }

    async fn render_frame(&mut self, request: u64, start: StartFrame) -> Result<(), LatticeError> {
        let frame_number = start.frame_number;
        self.send(StartFrameReply { frame_number }.to_reply(request)?)?;
        // The start payload is owned from here on.
        self.send(FrameReleased { frame_number }.to_command(0)?)?;

        let head = self.head.as_ref().map(|(_, head)| head);
        let events = self.renderer.render(&start, head).await;
        for event in events {
            self.send(event.to_command(0)?)?;
        }

        self.finished_frame = frame_number;
        self.send(FinishFrameReply { frame_number }.to_reply(0)?)
    }

    fn send(&self, packet: Packet) -> Result<(), LatticeError> {
        self.outbound.send(packet)?;
        Ok(())
    }
}

fn split(outcome: Result<(), String>) -> (bool, Option<String>) {
    match outcome {
        Ok(()) => (true, None),
        Err(error) => (false, Some(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Exit;
    use crate::render::NullRenderer;

    async fn expect<P: Payload>(link: &mut Link) -> (P, u64) {
        let packet = link.rx.recv().await.expect("worker reply");
        let request = packet.request_id();
        let command = Command::new(COORDINATOR, packet);
        (command.payload::<P>().unwrap(), request)
    }

    #[tokio::test]
    async fn frame_replies_in_order() {
        let (mut coordinator, worker_link) = Link::pair();
        let handle = Worker::spawn("w0", worker_link, Box::new(NullRenderer::new()));

        let (hello, _) = expect::<Hello>(&mut coordinator).await;
        assert_eq!(hello.name, "w0");

        let start = StartFrame {
            frame_number: 1,
            frame_id: 5,
            data: vec![],
        };
        coordinator.tx.send(start.to_command(3).unwrap()).unwrap();

        let (reply, request) = expect::<StartFrameReply>(&mut coordinator).await;
        assert_eq!((reply.frame_number, request), (1, 3));
        let (released, _) = expect::<FrameReleased>(&mut coordinator).await;
        assert_eq!(released.frame_number, 1);
        let (finished, _) = expect::<FinishFrameReply>(&mut coordinator).await;
        assert_eq!(finished.frame_number, 1);

        coordinator
            .tx
            .send(NodeStop { node_id: 1 }.to_command(0).unwrap())
            .unwrap();
        assert_eq!(handle.await.unwrap().unwrap(), WorkerExit::Stopped);
    }

    #[tokio::test]
    async fn exits_when_link_closes() {
        let (mut coordinator, worker_link) = Link::pair();
        let handle = Worker::spawn("w1", worker_link, Box::new(NullRenderer::new()));
        expect::<Hello>(&mut coordinator).await;

        coordinator.tx.send(Exit.to_command(4).unwrap()).unwrap();
        let (reply, request) = expect::<ExitReply>(&mut coordinator).await;
        assert!(reply.result);
        assert_eq!(request, 4);

        drop(coordinator);
        assert_eq!(handle.await.unwrap().unwrap(), WorkerExit::Disconnected);
    }

    #[test]
    fn split_maps_errors() {
        assert_eq!(split(Ok(())), (true, None));
        assert_eq!(split(Err("x".into())), (false, Some("x".into())));
    }
}
