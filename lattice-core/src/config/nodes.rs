use tracing::{info, warn};

use crate::config::Config;
use crate::error::LatticeError;
use crate::launch::NodeLauncher;
use crate::net::ConnectionDescription;
use crate::node::{Node, NodeId, NodeState};

fn find_node(nodes: &[Node], id: NodeId) -> Result<&Node, LatticeError> {
    nodes
        .iter()
        .find(|node| node.id() == id)
        .ok_or(LatticeError::UnknownNode(id))
}

fn find_node_mut(nodes: &mut [Node], id: NodeId) -> Result<&mut Node, LatticeError> {
    nodes
        .iter_mut()
        .find(|node| node.id() == id)
        .ok_or(LatticeError::UnknownNode(id))
}

impl Config {
    // ── Node set ─────────────────────────────────────────────────

    /// Create a stopped node through the config's factory.
    pub fn create_node(&mut self, description: ConnectionDescription) -> NodeId {
        let id = self.next_node_id;
        self.next_node_id += 1;
        let node = self.factory.create_node(id, description);
        info!("created node {id} '{}'", node.name());
        self.nodes.push(node);
        id
    }

    /// Remove a stopped, unused node.
    pub fn destroy_node(&mut self, id: NodeId) -> Result<Node, LatticeError> {
        let node = find_node(&self.nodes, id)?;
        if node.is_used() {
            return Err(LatticeError::NodeInUse(id));
        }
        if node.state() != NodeState::Stopped {
            return Err(LatticeError::InvalidTransition {
                node: id,
                action: "destroy",
                state: node.state(),
            });
        }
        let index = self
            .nodes
            .iter()
            .position(|node| node.id() == id)
            .ok_or(LatticeError::UnknownNode(id))?;
        Ok(self.nodes.remove(index))
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.iter().find(|node| node.id() == id)
    }

    /// Mutable access for attaching pipes.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|node| node.id() == id)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    // ── Launch ───────────────────────────────────────────────────

    /// Launch the worker for `id` and wait for it to announce itself.
    ///
    /// `Stopped → Launched → Connected → Listening`, bounded by the node's
    /// launch timeout. On failure the node is back in `Stopped`.
    pub async fn launch_node(
        &mut self,
        id: NodeId,
        launcher: &dyn NodeLauncher,
    ) -> Result<(), LatticeError> {
        let node = find_node_mut(&mut self.nodes, id)?;
        node.launched()?;
        let description = node.description().clone();
        info!("launching node {id} on '{}'", description.hostname);

        let peer = match launcher.launch(id, &description, self.session()).await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("node {id} failed to launch: {e}");
                find_node_mut(&mut self.nodes, id)?.force_stop();
                return Err(e);
            }
        };
        find_node_mut(&mut self.nodes, id)?.connected(peer)?;

        let timeout = (description.launch_timeout > 0).then(|| description.launch_timeout_duration());
        let announced = self
            .pump_until_deadline("launch_node", timeout, |config| {
                config
                    .node(id)
                    .is_none_or(|node| node.state() != NodeState::Connected)
            })
            .await;
        if let Err(e) = announced {
            self.abort_node(id);
            return Err(e);
        }

        match find_node(&self.nodes, id)?.state() {
            NodeState::Listening => Ok(()),
            _ => Err(LatticeError::Launch(format!(
                "node {id} lost its link before announcing itself"
            ))),
        }
    }

    // ── Init / exit pairs ────────────────────────────────────────

    /// Send the init request to node `id` without waiting for the reply.
    pub fn node_send_init(&mut self, id: NodeId, init_id: u32) -> Result<(), LatticeError> {
        let node = find_node_mut(&mut self.nodes, id)?;
        node.send_init(init_id, &mut self.requests, self.transport.as_ref())?;
        Ok(())
    }

    /// Wait for the reply to [`node_send_init`](Self::node_send_init).
    pub async fn node_sync_init(&mut self, id: NodeId) -> Result<bool, LatticeError> {
        let node = find_node(&self.nodes, id)?;
        let request = match (node.state(), node.pending_request()) {
            (NodeState::Initialising, Some(request)) => request,
            _ => return Err(LatticeError::NoPendingRequest(id)),
        };
        let ok = self.wait_node_request(id, request, "node_sync_init").await?;

        let current_frame = self.current_frame;
        let node = find_node_mut(&mut self.nodes, id)?;
        node.finish_init(ok);
        if ok {
            node.release_frame(current_frame);
        } else {
            self.error = Some(
                node.error()
                    .map_or_else(|| format!("node {id} failed to initialise"), str::to_string),
            );
        }
        Ok(ok)
    }

    /// Send the exit request to node `id` without waiting for the reply.
    pub fn node_send_exit(&mut self, id: NodeId) -> Result<(), LatticeError> {
        let node = find_node_mut(&mut self.nodes, id)?;
        node.send_exit(&mut self.requests, self.transport.as_ref())?;
        Ok(())
    }

    /// Wait for the reply to [`node_send_exit`](Self::node_send_exit).
    pub async fn node_sync_exit(&mut self, id: NodeId) -> Result<bool, LatticeError> {
        let node = find_node(&self.nodes, id)?;
        let request = match (node.state(), node.pending_request()) {
            (NodeState::Initialised, Some(request)) => request,
            _ => return Err(LatticeError::NoPendingRequest(id)),
        };
        let ok = self.wait_node_request(id, request, "node_sync_exit").await?;
        find_node_mut(&mut self.nodes, id)?.finish_exit(ok);
        self.update_unlocked();
        Ok(ok)
    }

    /// Tell the worker behind `id` to terminate and mark the node stopped.
    pub fn stop_node(&mut self, id: NodeId) -> Result<(), LatticeError> {
        let node = find_node_mut(&mut self.nodes, id)?;
        if let Some(request) = node.stop(self.transport.as_ref())? {
            self.requests.abandon_request(request);
        }
        info!("node {id} stopped");
        self.update_unlocked();
        Ok(())
    }

    // ── Whole-cluster conveniences ───────────────────────────────

    /// `start_init`, init every listening node, then `finish_init`.
    pub async fn init(&mut self, init_id: u32) -> Result<bool, LatticeError> {
        if !self.start_init(init_id).await? {
            return Ok(false);
        }

        let listening: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.state() == NodeState::Listening)
            .map(Node::id)
            .collect();
        for &id in &listening {
            self.node_send_init(id, init_id)?;
        }
        let mut ok = true;
        for id in listening {
            ok &= self.node_sync_init(id).await?;
        }
        if !ok {
            return Ok(false);
        }

        self.finish_init().await
    }

    /// `exit`, then exit every initialised node that nothing uses.
    pub async fn exit_all(&mut self) -> Result<bool, LatticeError> {
        let mut ok = self.exit().await?;

        let running: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|node| node.is_running() && !node.is_used())
            .map(Node::id)
            .collect();
        for &id in &running {
            self.node_send_exit(id)?;
        }
        for id in running {
            ok &= self.node_sync_exit(id).await?;
        }
        Ok(ok)
    }

    async fn wait_node_request(
        &mut self,
        id: NodeId,
        request: u64,
        operation: &'static str,
    ) -> Result<bool, LatticeError> {
        match self.wait_request(request, operation).await {
            Ok(result) => Ok(result.as_bool().unwrap_or(false)),
            Err(e) => {
                self.abort_node(id);
                Err(e)
            }
        }
    }

    /// Give up on a node that did not answer in time.
    fn abort_node(&mut self, id: NodeId) {
        let Some(node) = self.nodes.iter_mut().find(|node| node.id() == id) else {
            return;
        };
        let pending = match node.stop(self.transport.as_ref()) {
            Ok(pending) => pending,
            Err(_) => node.force_stop(),
        };
        if let Some(request) = pending {
            self.requests.abandon_request(request);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::launch::LocalLauncher;
    use crate::net::PeerTable;
    use crate::node::DefaultNodeFactory;

    fn config_with_launcher() -> (Config, LocalLauncher) {
        let table = Arc::new(PeerTable::new());
        let config = Config::new(table.clone(), Box::new(DefaultNodeFactory));
        (config, LocalLauncher::new(table))
    }

    #[tokio::test]
    async fn node_walks_the_lifecycle() {
        let (mut config, launcher) = config_with_launcher();
        let id = config.create_node(ConnectionDescription::default());
        assert_eq!(config.node(id).unwrap().state(), NodeState::Stopped);

        config.launch_node(id, &launcher).await.unwrap();
        assert_eq!(config.node(id).unwrap().state(), NodeState::Listening);

        assert!(config.init(4).await.unwrap());
        assert_eq!(config.node(id).unwrap().state(), NodeState::Initialised);
        assert!(config.is_running());

        config.start_frame(0, vec![]).unwrap();
        config.finish_all_frames().await.unwrap();
        assert_eq!(config.node(id).unwrap().released_frame(), 1);

        assert!(config.exit_all().await.unwrap());
        assert_eq!(config.node(id).unwrap().state(), NodeState::Stopped);
        config.destroy_node(id).unwrap();
        assert!(config.nodes().is_empty());
    }

    #[tokio::test]
    async fn sync_without_send_is_rejected() {
        let (mut config, launcher) = config_with_launcher();
        let id = config.create_node(ConnectionDescription::default());
        config.launch_node(id, &launcher).await.unwrap();

        assert!(matches!(
            config.node_sync_init(id).await,
            Err(LatticeError::NoPendingRequest(n)) if n == id
        ));
        assert!(matches!(
            config.node_sync_exit(id).await,
            Err(LatticeError::NoPendingRequest(n)) if n == id
        ));
    }

    #[tokio::test]
    async fn used_node_cannot_be_stopped_or_destroyed() {
        let (mut config, launcher) = config_with_launcher();
        let id = config.create_node(ConnectionDescription::default());
        config.launch_node(id, &launcher).await.unwrap();

        config.node_mut(id).unwrap().add_pipe(1);
        assert!(matches!(config.stop_node(id), Err(LatticeError::NodeInUse(_))));
        assert!(matches!(config.destroy_node(id), Err(LatticeError::NodeInUse(_))));

        config.node_mut(id).unwrap().remove_pipe(1);
        assert!(matches!(
            config.destroy_node(id),
            Err(LatticeError::InvalidTransition { .. })
        ));
        config.stop_node(id).unwrap();
        config.destroy_node(id).unwrap();
    }

    #[tokio::test]
    async fn unknown_node_is_reported() {
        let (mut config, _launcher) = config_with_launcher();
        assert!(matches!(config.node_send_init(9, 1), Err(LatticeError::UnknownNode(9))));
        assert!(matches!(config.stop_node(9), Err(LatticeError::UnknownNode(9))));
    }
}
