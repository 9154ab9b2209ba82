use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LatticeError;
use crate::object::Distributable;
use crate::protocol::{
    Exit, FinishAllFrames, FinishFrame, FinishInit, ObjectDelta, Payload, StartFrame, StartInit,
};

impl Config {
    /// First init barrier. Resets the frame counters and fixes the set of
    /// peers taking part in the run.
    ///
    /// Returns `Ok(false)` if any peer failed; see [`error`](Self::error).
    pub async fn start_init(&mut self, init_id: u32) -> Result<bool, LatticeError> {
        self.current_frame = 0;
        self.unlocked_frame = 0;
        self.finished_frame = 0;
        self.error = None;
        self.drop_frame_starts();
        self.drop_tombstones();
        self.members = self
            .transport
            .peers()
            .into_iter()
            .map(|peer| (peer, 0))
            .collect();

        info!(
            "init {init_id}: {} peer(s), latency {}",
            self.members.len(),
            self.latency
        );
        let init = StartInit {
            init_id,
            latency: self.latency,
        };
        let result = self.barrier("start_init", &init).await?;
        self.handle_events();
        Ok(result)
    }

    /// Second init barrier. Publishes the head object to every peer and
    /// starts running on success; the publication is rolled back on failure.
    pub async fn finish_init(&mut self) -> Result<bool, LatticeError> {
        if self.running {
            return Err(LatticeError::ProtocolViolation(
                "finish_init called while running",
            ));
        }
        let head_id = self.next_object_id;
        self.next_object_id += 1;
        self.head_id = Some(head_id);

        let init = FinishInit {
            head_id,
            head: self.head.instance_data()?,
        };
        let result = match self.barrier("finish_init", &init).await {
            Ok(result) => result,
            Err(e) => {
                self.head_id = None;
                return Err(e);
            }
        };

        if result {
            self.head.clear_dirty();
            self.running = true;
        } else {
            warn!("finish_init failed, unmapping head object {head_id}");
            self.head_id = None;
        }
        self.handle_events();
        Ok(self.running)
    }

    /// Start the next frame on every peer without waiting for it.
    ///
    /// Returns the new frame number.
    pub fn start_frame(&mut self, frame_id: u32, data: Vec<u8>) -> Result<u32, LatticeError> {
        let frame_number = self.current_frame + 1;
        let start = StartFrame {
            frame_number,
            frame_id,
            data,
        };
        let id = self.open_barrier("start_frame", &start)?;
        self.frame_starts.insert(id, frame_number);
        self.current_frame = frame_number;

        if self.rendering_nodes().next().is_none() {
            // Nothing local consumes the inputs.
            self.unlocked_frame = frame_number;
        }
        self.update_finished();
        debug!("---- started frame {frame_number} ----");
        Ok(frame_number)
    }

    /// Wait until the current frame is unlocked locally and the cluster is
    /// at most `latency` frames behind.
    ///
    /// Returns the frame whose resources may now be reused,
    /// `max(current_frame - latency, 0)`.
    pub async fn finish_frame(&mut self) -> Result<u32, LatticeError> {
        let current = self.current_frame;
        let frame_to_finish = current.saturating_sub(self.latency);

        let finish = FinishFrame {
            frame_number: current,
        };
        self.broadcast(&finish.to_command(0)?);
        self.pump_until("finish_frame", |config| {
            config.unlocked_frame >= current && config.finished_frame >= frame_to_finish
        })
        .await?;

        self.collect_frame_starts();
        self.handle_events();
        debug!("---- finished frame {frame_to_finish} ----");
        Ok(frame_to_finish)
    }

    /// Wait until every started frame is finished on every peer.
    pub async fn finish_all_frames(&mut self) -> Result<u32, LatticeError> {
        let current = self.current_frame;
        let finish = FinishAllFrames {
            frame_number: current,
        };
        self.broadcast(&finish.to_command(0)?);
        self.pump_until("finish_all_frames", |config| {
            config.finished_frame >= current
        })
        .await?;

        self.collect_frame_starts();
        self.handle_events();
        debug!("---- finished all frames up to {current} ----");
        Ok(current)
    }

    /// Exit barrier. Drops the head object and every undelivered event.
    pub async fn exit(&mut self) -> Result<bool, LatticeError> {
        self.running = false;
        let result = self.barrier("exit", &Exit).await;

        if let Some(head_id) = self.head_id.take() {
            debug!("unmapped head object {head_id}");
        }
        self.drop_frame_starts();
        self.drop_tombstones();
        self.events.clear();
        while self.event_queue.try_recv().is_some() {}
        self.members.clear();

        let result = result?;
        info!("exit {}", if result { "complete" } else { "failed" });
        Ok(result)
    }

    /// Move the head and push the change to every peer.
    pub fn set_head_matrix(&mut self, matrix: [f32; 16]) -> Result<(), LatticeError> {
        self.head.set_matrix(matrix);
        self.commit_head()
    }

    /// Ship pending head changes. Before `finish_init` the changes stay
    /// pending and go out with the instance data.
    pub fn commit_head(&mut self) -> Result<(), LatticeError> {
        let Some(object_id) = self.head_id else {
            return Ok(());
        };
        if let Some((bits, data)) = self.head.pack()? {
            let delta = ObjectDelta {
                object_id,
                dirty: bits.bits(),
                data,
            };
            self.broadcast(&delta.to_command(0)?);
        }
        Ok(())
    }

    /// Check the start replies that have arrived, without waiting for the
    /// rest.
    fn collect_frame_starts(&mut self) {
        let served: Vec<(u64, u32)> = self
            .frame_starts
            .iter()
            .filter(|&(&id, _)| self.requests.is_served(id))
            .map(|(&id, &frame)| (id, frame))
            .collect();
        for (id, frame) in served {
            self.frame_starts.remove(&id);
            let started = self.requests.wait_request(id).and_then(|r| r.as_bool());
            if started != Some(true) {
                warn!("frame {frame} did not start cleanly on every peer");
            }
        }
    }

    fn drop_frame_starts(&mut self) {
        for id in std::mem::take(&mut self.frame_starts).into_keys() {
            self.barriers.cancel(id);
            self.requests.abandon_request(id);
        }
    }

    /// Late barrier replies stop at the collector and late node replies at
    /// the node's pending check, so a tombstone is never served after this.
    fn drop_tombstones(&mut self) {
        let dropped = self.requests.drop_abandoned();
        if dropped > 0 {
            debug!("dropped {dropped} abandoned request(s)");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::message::CommandType;
    use crate::net::{ConnectionDescription, Link, Packet, PeerTable};
    use crate::node::DefaultNodeFactory;
    use crate::protocol::{
        ExitReply, FinishFrameReply, FinishInitReply, FrameReleased, NodeInit, NodeInitReply,
        StartFrameReply, StartInitReply,
    };
    use crate::session::Command;

    fn lone_config(latency: u32) -> Config {
        let mut config = Config::new(Arc::new(PeerTable::new()), Box::new(DefaultNodeFactory));
        config.set_latency(latency);
        config
    }

    #[tokio::test]
    async fn no_peers_never_blocks() {
        for latency in 0..4 {
            let mut config = lone_config(latency);
            assert!(config.start_init(1).await.unwrap());
            assert!(config.finish_init().await.unwrap());

            for k in 1..=6u32 {
                assert_eq!(config.start_frame(0, vec![]).unwrap(), k);
                let reusable = config.finish_frame().await.unwrap();
                assert_eq!(reusable, k.saturating_sub(latency));
                assert!(config.finished_frame() <= config.unlocked_frame());
                assert!(config.unlocked_frame() <= config.current_frame());
            }
            assert_eq!(config.finish_all_frames().await.unwrap(), 6);
            assert!(config.exit().await.unwrap());
            assert!(!config.is_running());
        }
    }

    #[tokio::test]
    async fn finish_init_twice_is_rejected() {
        let mut config = lone_config(1);
        config.start_init(1).await.unwrap();
        config.finish_init().await.unwrap();
        assert!(matches!(
            config.finish_init().await,
            Err(LatticeError::ProtocolViolation(_))
        ));
    }

    /// A scripted peer that answers barriers and renders frames instantly,
    /// but lags `lag` frames behind before reporting completion and never
    /// reports a frame past `last_report`.
    async fn scripted_peer(mut link: Link, lag: u32, last_report: u32) {
        let mut started = Vec::new();
        while let Some(packet) = link.rx.recv().await {
            let request = packet.request_id();
            let command = Command::new(1, packet);
            let reply = match command.command_type().unwrap() {
                CommandType::StartInit => StartInitReply {
                    result: true,
                    error: None,
                }
                .to_reply(request),
                CommandType::FinishInit => FinishInitReply {
                    result: true,
                    error: None,
                }
                .to_reply(request),
                CommandType::Exit => ExitReply {
                    result: true,
                    error: None,
                }
                .to_reply(request),
                CommandType::StartFrame => {
                    let start = command.payload::<StartFrame>().unwrap();
                    started.push(start.frame_number);
                    let released = FrameReleased {
                        frame_number: start.frame_number,
                    };
                    link.tx.send(released.to_command(0).unwrap()).unwrap();
                    let reported = started.iter().rev().nth(lag as usize);
                    if let Some(&done) = reported.filter(|&&done| done <= last_report) {
                        let finished = FinishFrameReply { frame_number: done };
                        link.tx.send(finished.to_reply(0).unwrap()).unwrap();
                    }
                    StartFrameReply {
                        frame_number: start.frame_number,
                    }
                    .to_reply(request)
                }
                CommandType::FinishAllFrames => {
                    let last = started.last().copied().unwrap_or(0);
                    FinishFrameReply { frame_number: last }.to_reply(0)
                }
                _ => continue,
            };
            link.tx.send(reply.unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn latency_bounds_the_lead() {
        let table = Arc::new(PeerTable::new());
        let mut config = Config::new(table.clone(), Box::new(DefaultNodeFactory));
        config.set_latency(2);

        let (local, remote) = Link::pair();
        table.attach(local, config.session());
        tokio::spawn(scripted_peer(remote, 2, u32::MAX));

        assert!(config.start_init(1).await.unwrap());
        assert!(config.finish_init().await.unwrap());
        for k in 1..=5u32 {
            config.start_frame(k, vec![]).unwrap();
            let reusable = config.finish_frame().await.unwrap();
            assert_eq!(reusable, k.saturating_sub(2));
            assert!(config.current_frame() - config.finished_frame() <= 2);
            assert!(config.finished_frame() <= config.unlocked_frame());
        }
        assert_eq!(config.finish_all_frames().await.unwrap(), 5);
        assert_eq!(config.finished_frame(), 5);
        assert!(config.exit().await.unwrap());
    }

    #[tokio::test]
    async fn silent_peer_times_out_with_its_id() {
        let table = Arc::new(PeerTable::new());
        let mut config = Config::new(table.clone(), Box::new(DefaultNodeFactory));
        config.set_barrier_timeout(Some(Duration::from_millis(50)));

        let (local, _silent) = Link::pair();
        let peer = table.attach(local, config.session());

        match config.start_init(1).await {
            Err(LatticeError::BarrierTimeout {
                operation, stalled, ..
            }) => {
                assert_eq!(operation, "start_init");
                assert_eq!(stalled, vec![peer]);
            }
            other => panic!("expected a barrier timeout, got {other:?}"),
        }
        assert!(config.stalled_peers().is_empty());
        assert_eq!(config.requests.abandoned_count(), 1);

        // The silent peer stalls the exit barrier too; the tombstones go
        // with the run either way.
        assert!(config.exit().await.is_err());
        assert_eq!(config.requests.abandoned_count(), 0);
    }

    #[tokio::test]
    async fn one_stalled_peer_holds_back_the_frame() {
        let table = Arc::new(PeerTable::new());
        let mut config = Config::new(table.clone(), Box::new(DefaultNodeFactory));
        config.set_latency(1);

        let (local, remote) = Link::pair();
        let healthy = table.attach(local, config.session());
        tokio::spawn(scripted_peer(remote, 0, u32::MAX));
        let (local, remote) = Link::pair();
        let stuck = table.attach(local, config.session());
        tokio::spawn(scripted_peer(remote, 0, 0));

        assert!(config.start_init(1).await.unwrap());
        assert!(config.finish_init().await.unwrap());
        config.set_barrier_timeout(Some(Duration::from_millis(100)));

        config.start_frame(1, vec![]).unwrap();
        assert_eq!(config.finish_frame().await.unwrap(), 0);

        config.start_frame(2, vec![]).unwrap();
        match config.finish_frame().await {
            Err(LatticeError::BarrierTimeout {
                operation, stalled, ..
            }) => {
                assert_eq!(operation, "finish_frame");
                assert_eq!(stalled, vec![stuck]);
                assert!(!stalled.contains(&healthy));
            }
            other => panic!("expected a barrier timeout, got {other:?}"),
        }
        assert_eq!(config.finished_frame(), 0);
    }

    /// Answers init and node init, then reports every frame finished as
    /// soon as it starts without ever releasing it.
    async fn early_finish_peer(mut link: Link) {
        while let Some(packet) = link.rx.recv().await {
            let request = packet.request_id();
            let command = Command::new(1, packet);
            let reply = match command.command_type().unwrap() {
                CommandType::StartInit => StartInitReply {
                    result: true,
                    error: None,
                }
                .to_reply(request),
                CommandType::FinishInit => FinishInitReply {
                    result: true,
                    error: None,
                }
                .to_reply(request),
                CommandType::NodeInit => {
                    let init = command.payload::<NodeInit>().unwrap();
                    NodeInitReply {
                        node_id: init.node_id,
                        result: true,
                        error: None,
                    }
                    .to_reply(request)
                }
                CommandType::StartFrame => {
                    let start = command.payload::<StartFrame>().unwrap();
                    let finished = FinishFrameReply {
                        frame_number: start.frame_number,
                    };
                    link.tx.send(finished.to_reply(0).unwrap()).unwrap();
                    StartFrameReply {
                        frame_number: start.frame_number,
                    }
                    .to_reply(request)
                }
                _ => continue,
            };
            link.tx.send(reply.unwrap()).unwrap();
        }
    }

    #[tokio::test]
    async fn finished_frame_raises_the_unlocked_frame() {
        let table = Arc::new(PeerTable::new());
        let mut config = Config::new(table.clone(), Box::new(DefaultNodeFactory));
        config.set_latency(0);
        config.set_barrier_timeout(Some(Duration::from_secs(2)));

        let (local, remote) = Link::pair();
        let peer = table.attach(local, config.session());
        tokio::spawn(early_finish_peer(remote));

        let id = config.create_node(ConnectionDescription::default());
        let node = config.node_mut(id).unwrap();
        node.launched().unwrap();
        node.connected(peer).unwrap();
        node.listening().unwrap();

        assert!(config.init(1).await.unwrap());
        assert!(config.node(id).unwrap().is_running());

        config.start_frame(1, vec![]).unwrap();
        assert_eq!(config.unlocked_frame(), 0);
        assert_eq!(config.finish_frame().await.unwrap(), 1);
        assert_eq!(config.finished_frame(), 1);
        assert_eq!(config.unlocked_frame(), 1);
        assert_eq!(config.node(id).unwrap().released_frame(), 0);
    }

    #[tokio::test]
    async fn lost_peer_fails_the_barrier() {
        let table = Arc::new(PeerTable::new());
        let mut config = Config::new(table.clone(), Box::new(DefaultNodeFactory));

        let (local, remote) = Link::pair();
        table.attach(local, config.session());
        tokio::spawn(async move {
            let mut remote = remote;
            // Read the init request, then hang up.
            let _: Option<Packet> = remote.rx.recv().await;
        });

        assert!(!config.start_init(1).await.unwrap());
        assert!(config.error().unwrap().contains("disconnected"));
        assert!(config.members().is_empty());
    }
}
