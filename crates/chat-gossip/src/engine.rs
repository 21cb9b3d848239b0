//! The gossip engine: rumor mongering, status reconciliation, anti-entropy
//!
//! The engine is single-threaded cooperative. It is owned by one event
//! loop, every handler runs to completion against a consistent snapshot
//! of state, and the only awaits are nonblocking sends. Send failures
//! never escape a handler; anti-entropy repairs whatever they lose.

use crate::{
    config::GossipConfig,
    message::{Message, Rumor, Status},
    peers::PeerTable,
    store::{Accept, RumorStore},
    transport::Transport,
};
use chat_core::Origin;
use rand::rngs::StdRng;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Render events emitted toward the user surface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// A line the local user submitted, echoed back
    OwnLine { text: String },
    /// A newly accepted line from a remote origin
    PeerLine { origin: Origin, seq: u32, text: String },
}

/// Counters kept by the engine for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub rumors_stored: u64,
    pub rumors_duplicate: u64,
    pub rumors_out_of_order: u64,
    pub statuses_handled: u64,
    pub resends: u64,
}

/// One outstanding rumor awaiting a status from its partner
#[derive(Debug, Clone)]
struct HotRumor {
    rumor: Rumor,
    partner: SocketAddr,
    deadline: Instant,
}

/// The rumor-mongering state machine
///
/// At most one rumor is outstanding at a time; any status received from
/// its partner cancels the pending resend deadline.
pub struct GossipEngine {
    origin: Origin,
    config: GossipConfig,
    store: RumorStore,
    peers: PeerTable,
    hot: Option<HotRumor>,
    rng: StdRng,
    transport: Arc<dyn Transport>,
    event_tx: mpsc::UnboundedSender<EngineEvent>,
    stats: EngineStats,
}

impl GossipEngine {
    /// Create an engine with an empty store and no rumor in flight
    pub fn new(
        origin: Origin,
        config: GossipConfig,
        peers: PeerTable,
        transport: Arc<dyn Transport>,
        event_tx: mpsc::UnboundedSender<EngineEvent>,
        rng: StdRng,
    ) -> Self {
        Self {
            origin,
            config,
            store: RumorStore::new(),
            peers,
            hot: None,
            rng,
            transport,
            event_tx,
            stats: EngineStats::default(),
        }
    }

    /// The local origin label
    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    /// Deadline of the outstanding hot rumor, if any
    pub fn resend_deadline(&self) -> Option<Instant> {
        self.hot.as_ref().map(|hot| hot.deadline)
    }

    /// Diagnostic counters
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Read access to the rumor store
    pub fn store(&self) -> &RumorStore {
        &self.store
    }

    /// The user submitted a line: store it and start mongering
    pub async fn on_user_line(&mut self, text: String) {
        let seq = self.store.next_expected(&self.origin);
        // next_expected keeps this contiguous; accept cannot refuse it
        self.store.accept(&self.origin, seq, &text);
        self.stats.rumors_stored += 1;
        self.emit(EngineEvent::OwnLine { text: text.clone() });

        match self.peers.random_neighbor(&mut self.rng) {
            Some(partner) => {
                let rumor = Rumor {
                    origin: self.origin.clone(),
                    seq,
                    text,
                };
                self.monger(rumor, partner).await;
            }
            None => debug!("no neighbors; {}:{} waits for anti-entropy", self.origin, seq),
        }
    }

    /// A rumor arrived from the wire
    pub async fn on_rumor(&mut self, rumor: Rumor, from: SocketAddr) {
        match self.store.accept(&rumor.origin, rumor.seq, &rumor.text) {
            Accept::Stored => {
                self.stats.rumors_stored += 1;
                self.emit(EngineEvent::PeerLine {
                    origin: rumor.origin.clone(),
                    seq: rumor.seq,
                    text: rumor.text.clone(),
                });
                // Newly in-order: monger to a fresh neighbor instead of
                // replying with status. The sender gets its status on the
                // ack path, which keeps echo loops from forming.
                if let Some(partner) = self.peers.random_neighbor(&mut self.rng) {
                    self.monger(rumor, partner).await;
                }
            }
            Accept::Duplicate => {
                self.stats.rumors_duplicate += 1;
                debug!("duplicate rumor {}:{} from {}", rumor.origin, rumor.seq, from);
                self.send_status(from).await;
            }
            Accept::OutOfOrder => {
                self.stats.rumors_out_of_order += 1;
                debug!(
                    "future rumor {}:{} from {}; status exchange will backfill",
                    rumor.origin, rumor.seq, from
                );
                self.send_status(from).await;
            }
        }
    }

    /// A status arrived from the wire: reconcile, then maybe continue
    /// the monger with a coin flip
    pub async fn on_status(&mut self, status: Status, from: SocketAddr) {
        self.stats.statuses_handled += 1;

        // Any status from the hot partner acks the outstanding rumor.
        let acked = match &self.hot {
            Some(hot) if hot.partner == from => self.hot.take(),
            _ => None,
        };

        // One corrective send and stop as soon as either side diverges.
        // Sorted iteration keeps the comparison deterministic.
        for (origin, &want_seq) in &status.want {
            let local_next = self.store.next_expected(origin);
            if want_seq < local_next {
                if let Some(text) = self.store.get(origin, want_seq) {
                    let rumor = Rumor {
                        origin: origin.clone(),
                        seq: want_seq,
                        text: text.to_owned(),
                    };
                    debug!("{} is behind on {}; sending {}", from, origin, want_seq);
                    self.monger(rumor, from).await;
                }
                return;
            }
            if want_seq > local_next {
                debug!("{} is ahead on {}; sending our status", from, origin);
                self.send_status(from).await;
                return;
            }
        }

        let mut acted = false;

        // Seed the remote with the first rumor of any origin it has
        // never heard of.
        let seeds: Vec<Rumor> = self
            .store
            .known_origins()
            .filter(|origin| !status.want.contains_key(*origin))
            .filter_map(|origin| {
                self.store.get(origin, 1).map(|text| Rumor {
                    origin: origin.clone(),
                    seq: 1,
                    text: text.to_owned(),
                })
            })
            .collect();
        for rumor in &seeds {
            debug!("seeding {} with {}:1", from, rumor.origin);
            self.send_rumor(rumor, from).await;
            acted = true;
        }

        // Learn any origin the remote mentions that we have never heard
        // of, and ask for its stream from the start.
        let unknown: Vec<Origin> = status
            .want
            .keys()
            .filter(|origin| !self.store.knows(origin))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            for origin in &unknown {
                debug!("learned of origin {} from {}", origin, from);
                self.store.observe_origin(origin);
            }
            self.send_status(from).await;
            acted = true;
        }

        if acted {
            return;
        }

        // Full agreement: flip a fair coin to continue or stop.
        if self.rng.gen_bool(0.5) {
            if let Some(partner) = self.peers.neighbor_other_than(from, &mut self.rng) {
                debug!("coin says continue; status to {}", partner);
                self.send_status(partner).await;
                if let Some(mut hot) = acked {
                    hot.partner = partner;
                    hot.deadline = Instant::now() + self.config.resend_timeout;
                    self.hot = Some(hot);
                }
            }
        } else {
            debug!("coin says stop");
        }
    }

    /// The hot-rumor deadline fired: resend to the same partner and re-arm
    pub async fn on_resend_deadline(&mut self) {
        let (rumor, partner) = match &self.hot {
            Some(hot) => (hot.rumor.clone(), hot.partner),
            None => return,
        };

        self.stats.resends += 1;
        debug!(
            "no status from {}; resending {}:{}",
            partner, rumor.origin, rumor.seq
        );
        self.send_rumor(&rumor, partner).await;

        if let Some(hot) = self.hot.as_mut() {
            hot.deadline = Instant::now() + self.config.resend_timeout;
        }
    }

    /// Anti-entropy tick: push our status at one random known endpoint
    ///
    /// The draw is over the full candidate set, not just neighbors, so
    /// partitions whose rumor chains died silently still get repaired.
    pub async fn on_anti_entropy(&mut self) {
        if let Some(target) = self.peers.random_candidate(&mut self.rng) {
            debug!("anti-entropy status to {}", target);
            self.send_status(target).await;
        }
    }

    /// Transmit a rumor and arm the hot-rumor record for it
    async fn monger(&mut self, rumor: Rumor, partner: SocketAddr) {
        self.send_rumor(&rumor, partner).await;
        self.hot = Some(HotRumor {
            rumor,
            partner,
            deadline: Instant::now() + self.config.resend_timeout,
        });
    }

    async fn send_rumor(&self, rumor: &Rumor, to: SocketAddr) {
        let message = Message::Rumor(rumor.clone());
        if let Err(e) = self.transport.send_to(&message, to).await {
            warn!("failed to send rumor {}:{} to {}: {}", rumor.origin, rumor.seq, to, e);
        }
    }

    async fn send_status(&self, to: SocketAddr) {
        let message = Message::Status(Status {
            want: self.store.status(),
        });
        if let Err(e) = self.transport.send_to(&message, to).await {
            warn!("failed to send status to {}: {}", to, e);
        }
    }

    fn emit(&self, event: EngineEvent) {
        if self.event_tx.send(event).is_err() {
            debug!("render channel closed; dropping event");
        }
    }
}
