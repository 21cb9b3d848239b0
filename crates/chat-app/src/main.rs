//! gossipchat: peer-to-peer gossip chat for co-located instances
//!
//! Binds one UDP port out of the per-user loopback window, then gossips
//! every line typed on stdin to the other instances in the window. The
//! transcript renders on stdout: own lines echo bare, peer lines carry
//! an `[origin/seq]` tag.

use anyhow::Context;
use chat_core::Origin;
use chat_gossip::{
    ChatNode, EngineEvent, GossipConfig, GossipEngine, GossipError, PeerTable, PortRange,
    Transport, UdpTransport,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let config = GossipConfig::default();
    config.validate().map_err(GossipError::Configuration)?;

    let range = PortRange::for_current_user();
    let transport = Arc::new(
        UdpTransport::bind(range, config.max_packet_size)
            .await
            .with_context(|| format!("no free UDP port in range {}", range))?,
    );
    let candidates = range.peer_endpoints(transport.local_addr().port());

    let mut rng = StdRng::from_entropy();
    let origin = Origin::generate(&mut rng);
    let peers = PeerTable::new(candidates, config.neighbor_fanout, &mut rng);
    info!(
        "origin {} on {}, neighbors {:?}",
        origin,
        transport.local_addr(),
        peers.neighbors()
    );

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (line_tx, line_rx) = mpsc::unbounded_channel();

    let engine = GossipEngine::new(
        origin,
        config.clone(),
        peers,
        transport.clone(),
        event_tx,
        rng,
    );
    let node = ChatNode::new(engine, transport, line_rx, config);

    tokio::spawn(read_lines(line_tx));
    tokio::spawn(render(event_rx));

    node.run().await?;
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Forward stdin lines into the engine; EOF closes the channel and
/// shuts the node down.
async fn read_lines(line_tx: mpsc::UnboundedSender<String>) {
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim_end().to_owned();
        if line.is_empty() {
            continue;
        }
        if line_tx.send(line).is_err() {
            break;
        }
    }
    debug!("stdin closed");
}

/// Print the transcript as the engine hands lines back.
async fn render(mut event_rx: mpsc::UnboundedReceiver<EngineEvent>) {
    while let Some(event) = event_rx.recv().await {
        match event {
            EngineEvent::OwnLine { text } => println!("{}", text),
            EngineEvent::PeerLine { origin, seq, text } => {
                println!("[{}/{}] {}", origin, seq, text)
            }
        }
    }
}
