//! UDP transport and port discovery for co-located peers
//!
//! Each instance binds one port out of a four-port loopback window
//! derived from the numeric user id, so up to four instances per user
//! find each other on the same host without any configuration.

use crate::{GossipError, Message, Result};
use async_trait::async_trait;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// Trait for the engine-facing send half of the transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Encode and send one message to a peer endpoint
    async fn send_to(&self, message: &Message, addr: SocketAddr) -> Result<()>;

    /// Get the local bind address
    fn local_addr(&self) -> SocketAddr;
}

/// Number of consecutive ports in a per-user window
pub const PORT_RANGE_SIZE: u16 = 4;

/// A contiguous window of loopback UDP ports shared by one user's instances
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    min: u16,
    count: u16,
}

impl PortRange {
    /// Window for an explicit numeric user id: `32768 + (uid % 4096) * 4`
    pub fn for_uid(uid: u32) -> Self {
        Self {
            min: 32768 + (uid % 4096) as u16 * PORT_RANGE_SIZE,
            count: PORT_RANGE_SIZE,
        }
    }

    /// Window for the user running this process
    pub fn for_current_user() -> Self {
        // SAFETY: getuid is always safe to call.
        Self::for_uid(unsafe { libc::getuid() })
    }

    /// Window starting at an explicit port
    pub fn new(min: u16, count: u16) -> Self {
        Self { min, count }
    }

    /// Lowest port in the window
    pub fn min(&self) -> u16 {
        self.min
    }

    /// Highest port in the window
    pub fn max(&self) -> u16 {
        self.min + self.count - 1
    }

    /// Ports in the window, lowest first
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.min..=self.max()
    }

    /// Loopback endpoints for every port in the window except `own_port`
    ///
    /// This is the candidate set the engine gossips over.
    pub fn peer_endpoints(&self, own_port: u16) -> Vec<SocketAddr> {
        self.ports()
            .filter(|port| *port != own_port)
            .map(loopback)
            .collect()
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min, self.max())
    }
}

fn loopback(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
}

/// UDP datagram transport bound inside a port window
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    max_packet_size: usize,
}

impl UdpTransport {
    /// Bind the first free port in the window
    ///
    /// Every port being taken is fatal at startup.
    pub async fn bind(range: PortRange, max_packet_size: usize) -> Result<Self> {
        for port in range.ports() {
            let addr = loopback(port);
            match UdpSocket::bind(addr).await {
                Ok(socket) => {
                    info!("bound to UDP port {}", port);
                    return Ok(Self {
                        socket,
                        local_addr: addr,
                        max_packet_size,
                    });
                }
                Err(e) => debug!("port {} unavailable: {}", port, e),
            }
        }

        Err(GossipError::Bind(range.to_string()))
    }

    /// Receive one datagram; used by the node event loop
    pub async fn recv_from(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf).await
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_to(&self, message: &Message, addr: SocketAddr) -> Result<()> {
        let bytes = message.encode()?;

        if bytes.len() > self.max_packet_size {
            return Err(GossipError::Transport(format!(
                "message too large: {} bytes (max: {})",
                bytes.len(),
                self.max_packet_size
            )));
        }

        let sent = self.socket.send_to(&bytes, addr).await?;
        if sent != bytes.len() {
            warn!("partial send: {} of {} bytes to {}", sent, bytes.len(), addr);
        }
        Ok(())
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Rumor, Status};
    use chat_core::Origin;

    #[test]
    fn test_port_range_for_uid() {
        let range = PortRange::for_uid(0);
        assert_eq!(range.min(), 32768);
        assert_eq!(range.max(), 32771);
        assert_eq!(range.ports().collect::<Vec<_>>(), vec![32768, 32769, 32770, 32771]);

        // the window wraps every 4096 uids
        assert_eq!(PortRange::for_uid(4096), PortRange::for_uid(0));
        assert_eq!(PortRange::for_uid(4095).max(), 49151);
    }

    #[test]
    fn test_peer_endpoints_exclude_own_port() {
        let range = PortRange::for_uid(0);
        let peers = range.peer_endpoints(32769);

        assert_eq!(peers.len(), 3);
        assert!(peers.iter().all(|a| a.ip() == IpAddr::V4(Ipv4Addr::LOCALHOST)));
        assert!(peers.iter().all(|a| a.port() != 32769));
    }

    #[test]
    fn test_port_range_display() {
        assert_eq!(PortRange::new(41000, 4).to_string(), "41000-41003");
    }

    // Scan for a window with at least two free ports so parallel tests
    // and busy CI hosts cannot collide on a fixed base.
    async fn bind_pair(max_packet_size: usize) -> (UdpTransport, UdpTransport) {
        for base in (41000..61000).step_by(PORT_RANGE_SIZE as usize) {
            let range = PortRange::new(base, PORT_RANGE_SIZE);
            if let Ok(first) = UdpTransport::bind(range, max_packet_size).await {
                if let Ok(second) = UdpTransport::bind(range, max_packet_size).await {
                    return (first, second);
                }
            }
        }
        panic!("no free port window on loopback");
    }

    #[tokio::test]
    async fn test_bind_first_free_port() {
        let (first, second) = bind_pair(8192).await;

        assert_ne!(first.local_addr(), second.local_addr());
        // the second bind lands on a later port of the same window
        let gap = second.local_addr().port() - first.local_addr().port();
        assert!(gap >= 1 && gap < PORT_RANGE_SIZE);
    }

    #[tokio::test]
    async fn test_send_and_receive_round_trip() {
        let (sender, receiver) = bind_pair(8192).await;

        let message = Message::Rumor(Rumor {
            origin: Origin::new("alice"),
            seq: 1,
            text: "over the wire".to_owned(),
        });
        sender.send_to(&message, receiver.local_addr()).await.unwrap();

        let mut buf = vec![0u8; 8192];
        let (len, from) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(from, sender.local_addr());
        assert_eq!(Message::decode(&buf[..len]).unwrap(), message);
    }

    #[tokio::test]
    async fn test_oversized_message_is_rejected() {
        let (sender, receiver) = bind_pair(64).await;

        let message = Message::Rumor(Rumor {
            origin: Origin::new("alice"),
            seq: 1,
            text: "x".repeat(512),
        });
        let result = sender.send_to(&message, receiver.local_addr()).await;
        assert!(matches!(result, Err(GossipError::Transport(_))));
    }

    #[tokio::test]
    async fn test_status_travels_too() {
        let (sender, receiver) = bind_pair(8192).await;

        let mut want = std::collections::BTreeMap::new();
        want.insert(Origin::new("alice"), 4);
        let message = Message::Status(Status { want });
        sender.send_to(&message, receiver.local_addr()).await.unwrap();

        let mut buf = vec![0u8; 8192];
        let (len, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(Message::decode(&buf[..len]).unwrap(), message);
    }
}
