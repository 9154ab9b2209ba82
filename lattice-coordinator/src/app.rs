//! One cluster run, start to finish.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};

use lattice_core::{
    Config, ConnectionDescription, DefaultNodeFactory, LatticeError, LocalLauncher, NodeId,
    NodeLauncher, NullRenderer, PeerTable, ProcessLauncher,
};

use crate::settings::{CoordinatorSettings, LaunchMode};

/// Summary of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub nodes: usize,
    /// Frames started before the run ended.
    pub frames: u32,
    /// Whether every peer and node exited cleanly.
    pub clean_exit: bool,
}

pub struct ClusterApp {
    settings: CoordinatorSettings,
    peers: Arc<PeerTable>,
    config: Config,
    launcher: Box<dyn NodeLauncher>,
}

impl ClusterApp {
    pub fn new(settings: CoordinatorSettings) -> Self {
        let peers = Arc::new(PeerTable::new());
        let mut config = Config::new(peers.clone(), Box::new(DefaultNodeFactory));
        config.set_latency(settings.cluster.latency);
        config.set_barrier_timeout(settings.barrier_timeout());

        let launcher: Box<dyn NodeLauncher> = match settings.launch.mode {
            LaunchMode::Local => {
                let frame_cost = settings.frame_cost();
                Box::new(LocalLauncher::with_renderer(
                    peers.clone(),
                    Box::new(move |_| Box::new(NullRenderer::with_frame_cost(frame_cost))),
                ))
            }
            LaunchMode::Process => {
                let launcher =
                    ProcessLauncher::new(peers.clone(), settings.launch.worker_command.clone());
                match settings.heartbeat() {
                    Some(interval) => Box::new(launcher.with_heartbeat(interval)),
                    None => Box::new(launcher),
                }
            }
        };

        Self {
            settings,
            peers,
            config,
            launcher,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    /// Launch, init, render and exit. Nodes are stopped on every path.
    pub async fn run(&mut self) -> Result<RunReport, LatticeError> {
        let nodes = self.launch_nodes().await;
        let outcome = match nodes {
            Ok(ref nodes) => self.render(nodes.len()).await,
            Err(e) => Err(e),
        };
        self.stop_nodes();
        outcome
    }

    async fn launch_nodes(&mut self) -> Result<Vec<NodeId>, LatticeError> {
        let mut ids = Vec::with_capacity(self.settings.nodes.len());
        for node in &self.settings.nodes {
            let description = ConnectionDescription::parse(&node.description)?;
            let id = self.config.create_node(description);
            ids.push(id);
            self.config.launch_node(id, self.launcher.as_ref()).await?;
        }
        info!("{} node(s) listening", ids.len());
        Ok(ids)
    }

    async fn render(&mut self, nodes: usize) -> Result<RunReport, LatticeError> {
        let config = &mut self.config;
        if !config.init(self.settings.cluster.init_id).await? {
            error!(
                "init failed: {}",
                config.error().unwrap_or("no reason given")
            );
            config.exit_all().await?;
            return Err(LatticeError::Other("cluster init failed".into()));
        }

        let started = Instant::now();
        let total = self.settings.cluster.frames;
        for frame in 1..=total {
            if !config.is_running() {
                info!("run stopped by an event at frame {}", config.current_frame());
                break;
            }
            config.start_frame(frame, Vec::new())?;
            config.finish_frame().await?;
            if frame % 100 == 0 {
                info!("frame {frame}/{total}");
            }
        }
        config.finish_all_frames().await?;

        let frames = config.current_frame();
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            info!(
                "{frames} frame(s) in {elapsed:.2}s ({:.1} fps)",
                f64::from(frames) / elapsed
            );
        }

        let clean_exit = config.exit_all().await?;
        if !clean_exit {
            warn!("unclean exit: {}", config.error().unwrap_or("no reason given"));
        }
        Ok(RunReport {
            nodes,
            frames,
            clean_exit,
        })
    }

    fn stop_nodes(&mut self) {
        let ids: Vec<NodeId> = self.config.nodes().iter().map(|node| node.id()).collect();
        for id in ids {
            if let Err(e) = self.config.stop_node(id) {
                warn!("node {id}: {e}");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
