//! Neighbor selection and gossip targets
//!
//! The neighbor set is a bounded random subset of the candidate
//! endpoints, chosen once at startup and fixed for the life of the
//! process. Anti-entropy draws from the full candidate set instead.

use rand::seq::SliceRandom;
use rand::Rng;
use std::net::SocketAddr;

/// The endpoints this peer gossips with
#[derive(Debug, Clone)]
pub struct PeerTable {
    candidates: Vec<SocketAddr>,
    neighbors: Vec<SocketAddr>,
}

impl PeerTable {
    /// Pick `fanout` distinct neighbors uniformly at random, without
    /// replacement; fewer candidates than `fanout` means all of them
    pub fn new<R: Rng>(candidates: Vec<SocketAddr>, fanout: usize, rng: &mut R) -> Self {
        let mut neighbors = candidates.clone();
        neighbors.shuffle(rng);
        neighbors.truncate(fanout);

        Self {
            candidates,
            neighbors,
        }
    }

    /// The fixed monger partners
    pub fn neighbors(&self) -> &[SocketAddr] {
        &self.neighbors
    }

    /// Every known endpoint, neighbors included
    pub fn candidates(&self) -> &[SocketAddr] {
        &self.candidates
    }

    /// Uniformly random monger target
    pub fn random_neighbor<R: Rng>(&self, rng: &mut R) -> Option<SocketAddr> {
        self.neighbors.choose(rng).copied()
    }

    /// Uniformly random neighbor other than `exclude`, if one exists
    pub fn neighbor_other_than<R: Rng>(
        &self,
        exclude: SocketAddr,
        rng: &mut R,
    ) -> Option<SocketAddr> {
        let others: Vec<SocketAddr> = self
            .neighbors
            .iter()
            .copied()
            .filter(|addr| *addr != exclude)
            .collect();
        others.choose(rng).copied()
    }

    /// Uniformly random endpoint from the full candidate set
    pub fn random_candidate<R: Rng>(&self, rng: &mut R) -> Option<SocketAddr> {
        self.candidates.choose(rng).copied()
    }
}
