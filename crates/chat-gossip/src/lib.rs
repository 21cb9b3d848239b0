//! # chat-gossip
//!
//! Epidemic dissemination of chat messages across co-located peers.
//!
//! This crate provides:
//! - A self-describing wire codec for rumor and status datagrams
//! - A per-origin rumor store with contiguous sequence streams
//! - The rumor-mongering state machine with status reconciliation,
//!   hot-rumor resend, and periodic anti-entropy repair
//! - A UDP transport bound inside a per-user loopback port window
//!
//! ## Example
//!
//! ```rust,no_run
//! use chat_core::Origin;
//! use chat_gossip::{ChatNode, GossipConfig, GossipEngine, PeerTable, PortRange, Transport, UdpTransport};
//! use rand::rngs::StdRng;
//! use rand::SeedableRng;
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//!
//! # #[tokio::main]
//! # async fn main() -> chat_gossip::Result<()> {
//! let config = GossipConfig::default();
//! let range = PortRange::for_current_user();
//! let transport = Arc::new(UdpTransport::bind(range, config.max_packet_size).await?);
//! let candidates = range.peer_endpoints(transport.local_addr().port());
//!
//! let mut rng = StdRng::from_entropy();
//! let origin = Origin::generate(&mut rng);
//! let peers = PeerTable::new(candidates, config.neighbor_fanout, &mut rng);
//!
//! let (event_tx, _event_rx) = mpsc::unbounded_channel();
//! let (_line_tx, line_rx) = mpsc::unbounded_channel();
//! let engine = GossipEngine::new(origin, config.clone(), peers, transport.clone(), event_tx, rng);
//! ChatNode::new(engine, transport, line_rx, config).run().await?;
//! # Ok(())
//! # }
//! ```

use thiserror::Error;

pub mod config;
pub mod engine;
pub mod message;
pub mod node;
pub mod peers;
pub mod store;
pub mod transport;

// Re-export commonly used types
pub use config::GossipConfig;
pub use engine::{EngineEvent, EngineStats, GossipEngine};
pub use message::{Message, Rumor, Status};
pub use node::ChatNode;
pub use peers::PeerTable;
pub use store::{Accept, RumorStore};
pub use transport::{PortRange, Transport, UdpTransport};

/// Result type for gossip operations
pub type Result<T> = std::result::Result<T, GossipError>;

/// Errors that can occur during gossip operations
#[derive(Error, Debug)]
pub enum GossipError {
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Bind error: no free port in range {0}")]
    Bind(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}
