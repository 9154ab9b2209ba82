use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::error::LatticeError;
use crate::message::CommandType;
use crate::net::connection::{Link, PacketReceiver, PacketSender};
use crate::net::packet::Packet;
use crate::session::{Command, Session};

/// Identifies one link in a [`PeerTable`].
pub type PeerId = u32;

/// The peer id used for commands that originate in this process.
pub const LOCAL_PEER: PeerId = 0;

/// Outbound side of the cluster: who can be addressed and how.
pub trait Transport: Send + Sync {
    /// Currently connected peers, in ascending id order.
    fn peers(&self) -> Vec<PeerId>;

    /// Queue `packet` for delivery to `peer`.
    fn send(&self, peer: PeerId, packet: Packet) -> Result<(), LatticeError>;

    /// Send a copy of `packet` to every peer. Returns the peers reached.
    fn broadcast(&self, packet: &Packet) -> Vec<PeerId> {
        self.peers()
            .into_iter()
            .filter(|&peer| match self.send(peer, packet.clone()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("broadcast to peer {peer} failed: {e}");
                    false
                }
            })
            .collect()
    }
}

/// The set of live links, keyed by peer id.
#[derive(Debug)]
pub struct PeerTable {
    links: RwLock<BTreeMap<PeerId, PacketSender>>,
    next_id: AtomicU32,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            links: RwLock::new(BTreeMap::new()),
            next_id: AtomicU32::new(LOCAL_PEER + 1),
        }
    }

    /// Register an outbound channel and return its peer id.
    pub fn add_link(&self, tx: PacketSender) -> PeerId {
        let peer = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(peer, tx);
        debug!("peer {peer} attached");
        peer
    }

    pub fn remove(&self, peer: PeerId) -> bool {
        let removed = self
            .links
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&peer)
            .is_some();
        if removed {
            debug!("peer {peer} detached");
        }
        removed
    }

    /// Register `link` and route everything it receives into `session`.
    ///
    /// When the link closes the peer is removed and `PeerDisconnected` is
    /// dispatched on its behalf.
    pub fn attach<C: 'static>(self: &Arc<Self>, link: Link, session: Arc<Session<C>>) -> PeerId {
        let peer = self.add_link(link.tx);
        let table = Arc::clone(self);
        spawn_inbound(peer, link.rx, session, move || {
            table.remove(peer);
        });
        peer
    }
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for PeerTable {
    fn peers(&self) -> Vec<PeerId> {
        self.links
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    fn send(&self, peer: PeerId, packet: Packet) -> Result<(), LatticeError> {
        let links = self.links.read().unwrap_or_else(PoisonError::into_inner);
        let tx = links.get(&peer).ok_or(LatticeError::UnknownPeer(peer))?;
        tx.send(packet)?;
        Ok(())
    }
}

/// Pump packets from `rx` into `session` until the link closes.
///
/// Heartbeats are consumed here. `on_close` runs before the synthetic
/// `PeerDisconnected` command is dispatched.
pub fn spawn_inbound<C: 'static>(
    peer: PeerId,
    mut rx: PacketReceiver,
    session: Arc<Session<C>>,
    on_close: impl FnOnce() + Send + 'static,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(packet) = rx.recv().await {
            if packet.command_id() == CommandType::Ping as u32 {
                trace!("heartbeat from peer {peer}");
                continue;
            }
            // Failures are logged by the session.
            let _ = session.dispatch(Command::new(peer, packet));
        }

        on_close();
        let lost = Packet::local(CommandType::PeerDisconnected);
        if let Err(e) = session.dispatch(Command::new(peer, lost)) {
            debug!("peer {peer} disconnect not delivered: {e}");
        }
    })
}
