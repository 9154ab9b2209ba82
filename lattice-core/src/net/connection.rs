use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::error::LatticeError;
use crate::net::codec::LatticeCodec;
use crate::net::description::{ConnectionDescription, ConnectionType};
use crate::net::packet::Packet;

pub type PacketSender = mpsc::UnboundedSender<Packet>;
pub type PacketReceiver = mpsc::UnboundedReceiver<Packet>;

/// One bidirectional packet link to a peer.
///
/// Both halves are plain channels, so a link may be backed by a socket
/// ([`Connection`]) or connect two tasks in the same process
/// ([`Link::pair`]).
#[derive(Debug)]
pub struct Link {
    pub tx: PacketSender,
    pub rx: PacketReceiver,
}

impl Link {
    /// Two in-process links wired back to back.
    pub fn pair() -> (Link, Link) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (Link { tx: a_tx, rx: a_rx }, Link { tx: b_tx, rx: b_rx })
    }
}

/// A framed TCP connection to a single peer.
///
/// Reading and writing happen on background tasks; the caller talks to
/// them through the channels of the [`Link`] returned by
/// [`into_link`](Self::into_link).
#[derive(Debug)]
pub struct Connection {
    link: Link,
}

impl Connection {
    pub fn new(stream: TcpStream, heartbeat: Option<Duration>) -> Self {
        let (mut net_writer, mut net_reader) = Framed::new(stream, LatticeCodec).split();

        // User -> Network
        let (user_tx, mut network_rx) = mpsc::unbounded_channel::<Packet>();

        // Network -> User
        let (network_tx, user_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Some(packet) = network_rx.recv().await {
                if let Err(e) = net_writer.send(packet).await {
                    warn!("network write error: {e}");
                    break;
                }
            }
        });

        tokio::spawn(async move {
            while let Some(result) = net_reader.next().await {
                match result {
                    Ok(packet) => {
                        if network_tx.send(packet).is_err() {
                            // Link was dropped, stop reading.
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("network read error: {e}");
                        break;
                    }
                }
            }
            debug!("connection reader finished");
        });

        if let Some(interval) = heartbeat {
            let heartbeat_tx = user_tx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    if heartbeat_tx.send(Packet::heartbeat()).is_err() {
                        break;
                    }
                }
            });
        }

        Self {
            link: Link {
                tx: user_tx,
                rx: user_rx,
            },
        }
    }

    /// Open a TCP connection to the peer described by `desc`.
    pub async fn connect(
        desc: &ConnectionDescription,
        heartbeat: Option<Duration>,
    ) -> Result<Self, LatticeError> {
        if desc.connection_type != ConnectionType::TcpIp {
            return Err(LatticeError::UnsupportedConnection(
                desc.connection_type.to_string(),
            ));
        }
        let stream = TcpStream::connect(desc.socket_address()).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream, heartbeat))
    }

    pub fn send(&self, packet: Packet) -> Result<(), LatticeError> {
        Ok(self.link.tx.send(packet)?)
    }

    pub async fn recv(&mut self) -> Option<Packet> {
        self.link.rx.recv().await
    }

    pub fn into_link(self) -> Link {
        self.link
    }
}
