//! Node event loop
//!
//! One task multiplexes the three event sources the engine consumes:
//! inbound datagrams, user lines, and timer expirations. Handlers run to
//! completion before the next event is polled, so the engine always
//! observes a consistent snapshot of its own state.

use crate::{
    config::GossipConfig,
    engine::GossipEngine,
    message::Message,
    transport::{Transport, UdpTransport},
    Result,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant};
use tracing::{debug, error, info, warn};

/// A running chat peer: the gossip engine wired to its event sources
pub struct ChatNode {
    engine: GossipEngine,
    transport: Arc<UdpTransport>,
    line_rx: mpsc::UnboundedReceiver<String>,
    config: GossipConfig,
    malformed: u64,
}

enum Event {
    Datagram(std::io::Result<(usize, SocketAddr)>),
    Line(Option<String>),
    ResendDeadline,
    AntiEntropy,
}

impl ChatNode {
    /// Wire an engine to its transport and user-line source
    pub fn new(
        engine: GossipEngine,
        transport: Arc<UdpTransport>,
        line_rx: mpsc::UnboundedReceiver<String>,
        config: GossipConfig,
    ) -> Self {
        Self {
            engine,
            transport,
            line_rx,
            config,
            malformed: 0,
        }
    }

    /// Drive the node until the user-line channel closes
    ///
    /// Queued datagrams are drained in arrival order before the other
    /// sources are serviced.
    pub async fn run(mut self) -> Result<()> {
        info!(
            "peer {} listening on {}",
            self.engine.origin(),
            self.transport.local_addr()
        );

        let mut buf = vec![0u8; self.config.max_packet_size];
        let first_tick = Instant::now() + self.config.anti_entropy_period;
        let mut anti_entropy = interval_at(first_tick, self.config.anti_entropy_period);

        loop {
            let deadline = self.engine.resend_deadline();

            let event = tokio::select! {
                biased;

                recv = self.transport.recv_from(&mut buf) => Event::Datagram(recv),
                line = self.line_rx.recv() => Event::Line(line),
                _ = deadline_sleep(deadline) => Event::ResendDeadline,
                _ = anti_entropy.tick() => Event::AntiEntropy,
            };

            match event {
                Event::Datagram(Ok((len, from))) => self.dispatch(&buf[..len], from).await,
                Event::Datagram(Err(e)) => {
                    error!("UDP receive error: {}", e);
                    return Err(e.into());
                }
                Event::Line(Some(text)) => self.engine.on_user_line(text).await,
                Event::Line(None) => break,
                Event::ResendDeadline => self.engine.on_resend_deadline().await,
                Event::AntiEntropy => self.engine.on_anti_entropy().await,
            }
        }

        info!(
            "input closed; shutting down with {} known origins ({:?})",
            self.engine.store().origin_count(),
            self.engine.stats()
        );
        Ok(())
    }

    async fn dispatch(&mut self, datagram: &[u8], from: SocketAddr) {
        match Message::decode(datagram) {
            Ok(Message::Rumor(rumor)) => {
                debug!("rumor {}:{} from {}", rumor.origin, rumor.seq, from);
                self.engine.on_rumor(rumor, from).await;
            }
            Ok(Message::Status(status)) => {
                debug!("status from {} covering {} origins", from, status.want.len());
                self.engine.on_status(status, from).await;
            }
            Err(e) => {
                self.malformed += 1;
                warn!(
                    "dropping malformed datagram from {} ({} so far): {}",
                    from, self.malformed, e
                );
            }
        }
    }
}

// Pending forever when no rumor is outstanding, so the select arm only
// fires while a deadline is armed.
async fn deadline_sleep(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineEvent;
    use crate::peers::PeerTable;
    use crate::transport::{PortRange, PORT_RANGE_SIZE};
    use chat_core::Origin;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;
    use tokio::time::timeout;

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

    struct TestPeer {
        line_tx: mpsc::UnboundedSender<String>,
        event_rx: mpsc::UnboundedReceiver<EngineEvent>,
        addr: SocketAddr,
    }

    fn spawn_peer(
        name: &str,
        transport: UdpTransport,
        peer_addr: SocketAddr,
        config: &GossipConfig,
        seed: u64,
    ) -> TestPeer {
        let transport = Arc::new(transport);
        let addr = transport.local_addr();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (line_tx, line_rx) = mpsc::unbounded_channel();

        let mut rng = StdRng::seed_from_u64(seed);
        let peers = PeerTable::new(vec![peer_addr], config.neighbor_fanout, &mut rng);
        let engine = GossipEngine::new(
            Origin::new(name),
            config.clone(),
            peers,
            transport.clone(),
            event_tx,
            rng,
        );
        tokio::spawn(ChatNode::new(engine, transport, line_rx, config.clone()).run());

        TestPeer {
            line_tx,
            event_rx,
            addr,
        }
    }

    #[tokio::test]
    async fn test_line_reaches_peer_over_loopback() {
        let config = GossipConfig::default().with_anti_entropy_period(Duration::from_millis(200));
        let (ta, tb) = bind_pair(config.max_packet_size).await;
        let (a_addr, b_addr) = (ta.local_addr(), tb.local_addr());

        let alice = spawn_peer("alice", ta, b_addr, &config, 1);
        let mut bob = spawn_peer("bob", tb, a_addr, &config, 2);
        assert_eq!(alice.addr, a_addr);

        alice.line_tx.send("hello over udp".to_owned()).unwrap();

        let event = timeout(Duration::from_secs(5), bob.event_rx.recv())
            .await
            .expect("no render before timeout")
            .expect("render channel closed");
        assert_eq!(
            event,
            EngineEvent::PeerLine {
                origin: Origin::new("alice"),
                seq: 1,
                text: "hello over udp".to_owned()
            }
        );
    }

    #[tokio::test]
    async fn test_lines_arrive_in_origin_order() {
        let config = GossipConfig::default()
            .with_resend_timeout(Duration::from_millis(100))
            .with_anti_entropy_period(Duration::from_millis(200));
        let (ta, tb) = bind_pair(config.max_packet_size).await;
        let (a_addr, b_addr) = (ta.local_addr(), tb.local_addr());

        let alice = spawn_peer("alice", ta, b_addr, &config, 3);
        let mut bob = spawn_peer("bob", tb, a_addr, &config, 4);

        for text in ["first", "second", "third"] {
            alice.line_tx.send(text.to_owned()).unwrap();
        }

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let event = timeout(Duration::from_secs(10), bob.event_rx.recv())
                .await
                .expect("peer never converged")
                .expect("render channel closed");
            if let EngineEvent::PeerLine { origin, seq, text } = event {
                assert_eq!(origin, Origin::new("alice"));
                seen.push((seq, text));
            }
        }

        assert_eq!(
            seen,
            vec![
                (1, "first".to_owned()),
                (2, "second".to_owned()),
                (3, "third".to_owned()),
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_datagrams_are_ignored() {
        let config = GossipConfig::default().with_anti_entropy_period(Duration::from_millis(200));
        let (ta, tb) = bind_pair(config.max_packet_size).await;
        let (a_addr, b_addr) = (ta.local_addr(), tb.local_addr());

        // a bare socket spraying garbage at bob
        let mut bob = spawn_peer("bob", tb, a_addr, &config, 5);
        let garbage = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        garbage.send_to(b"definitely not json", b_addr).await.unwrap();
        garbage.send_to(b"{}", b_addr).await.unwrap();

        // bob keeps running and still converges with a real peer
        let alice = spawn_peer("alice", ta, b_addr, &config, 6);
        alice.line_tx.send("still alive".to_owned()).unwrap();

        let event = timeout(Duration::from_secs(5), bob.event_rx.recv())
            .await
            .expect("no render before timeout")
            .expect("render channel closed");
        assert_eq!(
            event,
            EngineEvent::PeerLine {
                origin: Origin::new("alice"),
                seq: 1,
                text: "still alive".to_owned()
            }
        );
    }
}
