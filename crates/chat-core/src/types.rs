//! Core type definitions for gossipchat

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a message-producing peer
///
/// Origins are opaque labels, unique to a peer instance for its lifetime.
/// Equality and ordering are by value, so origins can key sorted maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Origin(String);

impl Origin {
    /// Create an Origin from an existing label
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh origin label from the given random source
    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        let suffix: String = (0..8).map(|_| char::from(rng.sample(Alphanumeric))).collect();
        Self(format!("peer-{}", suffix))
    }

    /// Get the string representation of the origin
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Origin {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for Origin {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
