//! Starting workers for nodes.
//!
//! A [`NodeLauncher`] brings up the worker behind a node and hands back the
//! peer id of the link to it. [`LocalLauncher`] runs workers as tasks in
//! this process; [`ProcessLauncher`] runs the node's launch command and
//! connects to the worker over TCP once it answers.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::LatticeError;
use crate::net::{Connection, ConnectionDescription, ConnectionType, Link, PeerId, PeerTable};
use crate::node::NodeId;
use crate::render::{FrameRenderer, NullRenderer};
use crate::session::Session;
use crate::sync::TimedLock;
use crate::worker::Worker;

/// How often a launched worker's port is probed.
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

#[async_trait]
pub trait NodeLauncher: Send + Sync {
    /// Start the worker for `node` and attach its link to `session`.
    async fn launch(
        &self,
        node: NodeId,
        description: &ConnectionDescription,
        session: Arc<Session<Config>>,
    ) -> Result<PeerId, LatticeError>;
}

// ── LocalLauncher ────────────────────────────────────────────────

pub type RendererFactory = Box<dyn Fn(NodeId) -> Box<dyn FrameRenderer> + Send + Sync>;

/// Runs each worker on a task of the current runtime, linked by channels.
pub struct LocalLauncher {
    peers: Arc<PeerTable>,
    renderers: RendererFactory,
}

impl LocalLauncher {
    /// Workers draw with a [`NullRenderer`].
    pub fn new(peers: Arc<PeerTable>) -> Self {
        Self::with_renderer(peers, Box::new(|_| Box::new(NullRenderer::new())))
    }

    pub fn with_renderer(peers: Arc<PeerTable>, renderers: RendererFactory) -> Self {
        Self { peers, renderers }
    }
}

#[async_trait]
impl NodeLauncher for LocalLauncher {
    async fn launch(
        &self,
        node: NodeId,
        description: &ConnectionDescription,
        session: Arc<Session<Config>>,
    ) -> Result<PeerId, LatticeError> {
        let (local, remote) = Link::pair();
        let peer = self.peers.attach(local, session);

        let host = match description.hostname.as_str() {
            "" => "local",
            host => host,
        };
        let handle = Worker::spawn(format!("{host}-{node}"), remote, (self.renderers)(node));
        tokio::spawn(async move {
            match handle.await {
                Ok(Ok(exit)) => debug!("local worker for node {node} ended: {exit:?}"),
                Ok(Err(e)) => warn!("local worker for node {node} failed: {e}"),
                Err(e) => warn!("local worker for node {node} panicked: {e}"),
            }
        });
        Ok(peer)
    }
}

// ── ProcessLauncher ──────────────────────────────────────────────

/// Runs the node's launch command through the system shell, then connects
/// to the worker at `hostname:port`.
///
/// Only TCP descriptions can be launched this way.
pub struct ProcessLauncher {
    peers: Arc<PeerTable>,
    worker_command: String,
    heartbeat: Option<Duration>,
}

impl ProcessLauncher {
    /// `worker_command` is what `%c` in a launch command expands to,
    /// before the port argument is appended.
    pub fn new(peers: Arc<PeerTable>, worker_command: impl Into<String>) -> Self {
        Self {
            peers,
            worker_command: worker_command.into(),
            heartbeat: None,
        }
    }

    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }
}

#[async_trait]
impl NodeLauncher for ProcessLauncher {
    async fn launch(
        &self,
        node: NodeId,
        description: &ConnectionDescription,
        session: Arc<Session<Config>>,
    ) -> Result<PeerId, LatticeError> {
        if description.connection_type != ConnectionType::TcpIp {
            return Err(LatticeError::UnsupportedConnection(
                description.connection_type.to_string(),
            ));
        }

        let command = expand_command(node, description, &self.worker_command);
        info!("node {node}: {command}");
        let mut child = shell(&command)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| LatticeError::Launch(format!("'{command}': {e}")))?;

        let timeout =
            (description.launch_timeout > 0).then(|| description.launch_timeout_duration());
        let connected = match wait_for_port(description.socket_address(), timeout).await {
            Ok(()) => Connection::connect(description, self.heartbeat).await,
            Err(e) => Err(e),
        };
        let connection = match connected {
            Ok(connection) => connection,
            Err(e) => {
                warn!("node {node}: killing launch command after {e}");
                kill_launch(&mut child).await;
                return Err(e);
            }
        };

        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => debug!("launch command for node {node} exited: {status}"),
                Err(e) => warn!("launch command for node {node}: {e}"),
            }
        });
        Ok(self.peers.attach(connection.into_link(), session))
    }
}

/// Kill a launch command and everything it started.
///
/// On unix the command leads its own process group, so the whole group is
/// signalled; a remote shell or worker it spawned goes down with it.
async fn kill_launch(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        let group = format!("-{pid}");
        match tokio::process::Command::new("kill")
            .args(["-KILL", "--", group.as_str()])
            .status()
            .await
        {
            Ok(status) if status.success() => {}
            Ok(status) => debug!("kill {group}: {status}"),
            Err(e) => debug!("kill {group}: {e}"),
        }
    }
    if let Err(e) = child.kill().await {
        debug!("launch command already gone: {e}");
    }
}

#[cfg(windows)]
fn shell(command: &str) -> tokio::process::Command {
    let mut shell = tokio::process::Command::new("cmd");
    shell.arg("/C").arg(command);
    shell
}

#[cfg(unix)]
fn shell(command: &str) -> tokio::process::Command {
    let mut shell = tokio::process::Command::new("sh");
    shell.arg("-c").arg(command).process_group(0);
    shell
}

/// Expand the placeholders of a launch command in one pass.
///
/// `%h` is the hostname, `%n` the node id and `%c` the worker command with
/// `--port` appended, wrapped in the description's quote character (a
/// quote of `'\0'` leaves it unquoted). `%%` is a literal percent sign;
/// any other `%` sequence is kept as is.
pub fn expand_command(
    node: NodeId,
    description: &ConnectionDescription,
    worker_command: &str,
) -> String {
    let quote = Some(description.launch_command_quote).filter(|&q| q != '\0');
    let mut expanded = String::with_capacity(description.launch_command.len());
    let mut chars = description.launch_command.chars();

    while let Some(c) = chars.next() {
        if c != '%' {
            expanded.push(c);
            continue;
        }
        match chars.next() {
            Some('h') => expanded.push_str(&description.hostname),
            Some('n') => expanded.push_str(&node.to_string()),
            Some('c') => {
                expanded.extend(quote);
                expanded.push_str(worker_command);
                expanded.push_str(&format!(" --port {}", description.port));
                expanded.extend(quote);
            }
            Some('%') => expanded.push('%'),
            Some(other) => {
                expanded.push('%');
                expanded.push(other);
            }
            None => expanded.push('%'),
        }
    }
    expanded
}

/// Wait until something accepts connections on `address`.
///
/// A prober thread opens the gate once the port answers; the caller waits
/// on the gate with the launch timeout (`None` waits forever).
async fn wait_for_port(address: String, timeout: Option<Duration>) -> Result<(), LatticeError> {
    let gate = Arc::new(TimedLock::new());
    gate.set(0);
    let abandoned = Arc::new(AtomicBool::new(false));

    {
        let gate = Arc::clone(&gate);
        let abandoned = Arc::clone(&abandoned);
        let address = address.clone();
        thread::spawn(move || {
            while !abandoned.load(Ordering::Acquire) {
                if port_answers(&address) {
                    gate.unset();
                    return;
                }
                thread::sleep(PROBE_INTERVAL);
            }
        });
    }

    let waiter = Arc::clone(&gate);
    let opened = tokio::task::spawn_blocking(move || waiter.set_timeout(timeout))
        .await
        .map_err(|e| LatticeError::Launch(e.to_string()))?;
    if opened {
        debug!("{address} is accepting connections");
        Ok(())
    } else {
        abandoned.store(true, Ordering::Release);
        Err(LatticeError::Timeout(timeout.unwrap_or_default()))
    }
}

fn port_answers(address: &str) -> bool {
    let Ok(addrs) = address.to_socket_addrs() else {
        return false;
    };
    addrs
        .into_iter()
        .any(|addr| TcpStream::connect_timeout(&addr, PROBE_INTERVAL).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Transport;
    use crate::node::DefaultNodeFactory;

    fn description(command: &str) -> ConnectionDescription {
        ConnectionDescription {
            launch_command: command.to_string(),
            ..ConnectionDescription::tcp("render3", 4242)
        }
    }

    #[test]
    fn expands_placeholders() {
        let desc = description("ssh -n %h %c # node %n");
        assert_eq!(
            expand_command(7, &desc, "lattice-worker"),
            "ssh -n render3 'lattice-worker --port 4242' # node 7"
        );
    }

    #[test]
    fn expansion_is_single_pass() {
        let desc = ConnectionDescription {
            launch_command_quote: '"',
            ..description("%c 100%% %x%")
        };
        // A worker command containing a placeholder is not expanded again.
        assert_eq!(
            expand_command(1, &desc, "run %h"),
            "\"run %h --port 4242\" 100% %x%"
        );
    }

    #[test]
    fn nul_quote_leaves_the_worker_command_bare() {
        let desc: ConnectionDescription = "TCPIP#100#ssh -n %h %c#0#1000#host1#4242#file"
            .parse()
            .unwrap();
        assert_eq!(desc.launch_command_quote, '\0');
        assert_eq!(
            expand_command(2, &desc, "lattice-worker"),
            "ssh -n host1 lattice-worker --port 4242"
        );
    }

    #[tokio::test]
    async fn closed_port_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let outcome = wait_for_port(address, Some(Duration::from_millis(120))).await;
        assert!(matches!(outcome, Err(LatticeError::Timeout(_))));
    }

    #[tokio::test]
    async fn non_tcp_descriptions_are_rejected() {
        let peers = Arc::new(PeerTable::new());
        let config = Config::new(peers.clone(), Box::new(DefaultNodeFactory));
        let launcher = ProcessLauncher::new(peers, "lattice-worker");
        let desc = ConnectionDescription {
            connection_type: ConnectionType::Udp,
            ..description("true")
        };
        assert!(matches!(
            launcher.launch(1, &desc, config.session()).await,
            Err(LatticeError::UnsupportedConnection(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_launcher_connects_once_the_port_answers() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = tokio::spawn(async move {
            // The first connection is the readiness probe.
            let (_probe, _) = listener.accept().await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            stream
        });

        let peers = Arc::new(PeerTable::new());
        let config = Config::new(peers.clone(), Box::new(DefaultNodeFactory));
        let launcher = ProcessLauncher::new(peers.clone(), "unused");
        let desc = ConnectionDescription {
            launch_command: "true".to_string(),
            launch_timeout: 2_000,
            ..ConnectionDescription::tcp("127.0.0.1", port)
        };

        let peer = launcher.launch(1, &desc, config.session()).await.unwrap();
        assert_eq!(peers.peers(), vec![peer]);
        accepted.await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn timed_out_launch_kills_the_command() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let marker = std::env::temp_dir()
            .join(format!("lattice-launch-{}-{port}", std::process::id()));
        let _ = std::fs::remove_file(&marker);
        // The inner shell is a grandchild; only a group kill stops it.
        let command = format!("sh -c 'sleep 1; touch {}'; true", marker.display());

        let peers = Arc::new(PeerTable::new());
        let config = Config::new(peers.clone(), Box::new(DefaultNodeFactory));
        let launcher = ProcessLauncher::new(peers, "unused");
        let desc = ConnectionDescription {
            launch_command: command,
            launch_timeout: 200,
            ..ConnectionDescription::tcp("127.0.0.1", port)
        };

        assert!(matches!(
            launcher.launch(1, &desc, config.session()).await,
            Err(LatticeError::Timeout(_))
        ));
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(!marker.exists());
    }
}
