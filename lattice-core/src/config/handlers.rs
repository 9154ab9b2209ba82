use tracing::{debug, info, warn};

use crate::config::Config;
use crate::event::ConfigEvent;
use crate::message::CommandType;
use crate::net::header::PROTOCOL_VERSION;
use crate::net::PeerId;
use crate::node::{NodeId, NodeState};
use crate::protocol::{
    ExitReply, FinishAllFramesReply, FinishFrameReply, FinishInitReply, FrameReleased, Hello,
    NodeExitReply, NodeInitReply, StartFrameReply, StartInitReply,
};
use crate::session::{Command, CommandResult, QueueSender, RequestResult, Session};

impl Config {
    pub(super) fn build_session(
        main: &QueueSender<Config>,
        events: &QueueSender<Config>,
    ) -> Session<Config> {
        let mut session = Session::new("config");
        session.register_handler(CommandType::Hello, Config::cmd_hello, main);
        session.register_handler(CommandType::StartInitReply, Config::cmd_start_init_reply, main);
        session.register_handler(CommandType::FinishInitReply, Config::cmd_finish_init_reply, main);
        session.register_handler(CommandType::ExitReply, Config::cmd_exit_reply, main);
        session.register_handler(CommandType::StartFrameReply, Config::cmd_start_frame_reply, main);
        session.register_handler(CommandType::FinishFrameReply, Config::cmd_finish_frame_reply, main);
        session.register_handler(
            CommandType::FinishAllFramesReply,
            Config::cmd_finish_all_frames_reply,
            main,
        );
        session.register_handler(CommandType::FrameReleased, Config::cmd_frame_released, main);
        session.register_handler(CommandType::NodeInitReply, Config::cmd_node_init_reply, main);
        session.register_handler(CommandType::NodeExitReply, Config::cmd_node_exit_reply, main);
        session.register_handler(CommandType::PeerDisconnected, Config::cmd_peer_disconnected, main);
        session.register_handler(CommandType::Event, Config::cmd_event, events);
        session
    }

    fn cmd_hello(&mut self, command: Command) -> CommandResult {
        let hello = command.payload::<Hello>()?;
        let peer = command.from();
        if hello.version != PROTOCOL_VERSION {
            warn!(
                "peer {peer} ('{}') speaks protocol {}, expected {PROTOCOL_VERSION}",
                hello.name, hello.version
            );
        }
        match self
            .nodes
            .iter_mut()
            .find(|node| node.peer() == Some(peer) && node.state() == NodeState::Connected)
        {
            Some(node) => {
                node.listening()?;
                info!("node {} is listening as '{}'", node.id(), hello.name);
            }
            None => debug!("peer {peer} announced itself as '{}'", hello.name),
        }
        Ok(())
    }

    fn cmd_start_init_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<StartInitReply>()?;
        self.barrier_reply(&command, reply.result, reply.error);
        Ok(())
    }

    fn cmd_finish_init_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<FinishInitReply>()?;
        self.barrier_reply(&command, reply.result, reply.error);
        Ok(())
    }

    fn cmd_exit_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<ExitReply>()?;
        self.barrier_reply(&command, reply.result, reply.error);
        Ok(())
    }

    fn cmd_start_frame_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<StartFrameReply>()?;
        let id = command.request_id();
        let expected = self.frame_starts.get(&id).copied();
        let ok = expected == Some(reply.frame_number);
        let error = (!ok).then(|| {
            format!(
                "peer {} started frame {}, expected {expected:?}",
                command.from(),
                reply.frame_number
            )
        });
        if let Some(error) = &error {
            warn!("{error}");
        }
        self.barrier_reply(&command, ok, error);
        Ok(())
    }

    fn cmd_finish_frame_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<FinishFrameReply>()?;
        self.peer_finished(command.from(), reply.frame_number);
        Ok(())
    }

    fn cmd_finish_all_frames_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<FinishAllFramesReply>()?;
        self.peer_finished(command.from(), reply.frame_number);
        Ok(())
    }

    fn cmd_frame_released(&mut self, command: Command) -> CommandResult {
        let released = command.payload::<FrameReleased>()?;
        let peer = command.from();
        for node in self.nodes.iter_mut().filter(|node| node.peer() == Some(peer)) {
            node.release_frame(released.frame_number);
        }
        self.update_unlocked();
        Ok(())
    }

    fn cmd_node_init_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<NodeInitReply>()?;
        self.node_reply(&command, reply.node_id, reply.result, reply.error);
        Ok(())
    }

    fn cmd_node_exit_reply(&mut self, command: Command) -> CommandResult {
        let reply = command.payload::<NodeExitReply>()?;
        self.node_reply(&command, reply.node_id, reply.result, None);
        Ok(())
    }

    fn cmd_peer_disconnected(&mut self, command: Command) -> CommandResult {
        self.peer_lost(command.from());
        Ok(())
    }

    fn cmd_event(&mut self, command: Command) -> CommandResult {
        let event = command.payload::<ConfigEvent>()?;
        self.events.push_back(event);
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────

    fn barrier_reply(&mut self, command: &Command, ok: bool, error: Option<String>) {
        let id = command.request_id();
        if let Some(outcome) = self.barriers.reply(id, command.from(), ok, error) {
            self.complete_barrier(id, outcome);
        }
    }

    fn node_reply(&mut self, command: &Command, node_id: NodeId, ok: bool, error: Option<String>) {
        let id = command.request_id();
        match self.nodes.iter_mut().find(|node| node.id() == node_id) {
            Some(node) if node.pending_request() == Some(id) => node.set_error(error),
            _ => {
                warn!(
                    "reply {id} from peer {} for node {node_id} matches no pending request",
                    command.from()
                );
                return;
            }
        }
        self.requests.serve_request(id, RequestResult::Bool(ok));
    }

    fn peer_finished(&mut self, peer: PeerId, frame: u32) {
        match self.members.get_mut(&peer) {
            Some(finished) => *finished = (*finished).max(frame),
            None => {
                debug!("frame report from peer {peer} outside the run");
                return;
            }
        }
        self.update_finished();
    }
}
