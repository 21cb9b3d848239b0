//! Wire codec for gossip datagrams
//!
//! A datagram carries one of two shapes, discriminated by which keys are
//! present in a self-describing JSON map: a rumor (`ChatText`, `Origin`,
//! `SeqNo`) or a status (`Want`). Anything else is malformed and dropped.

use crate::{GossipError, Result};
use chat_core::Origin;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const KEY_CHAT_TEXT: &str = "ChatText";
const KEY_ORIGIN: &str = "Origin";
const KEY_SEQ_NO: &str = "SeqNo";
const KEY_WANT: &str = "Want";

/// A single chat message: one entry in an origin's ordered stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rumor {
    /// Peer that produced the message
    pub origin: Origin,
    /// Position in the origin's stream, starting at 1
    pub seq: u32,
    /// The chat text itself
    pub text: String,
}

/// A compact summary of what a peer has seen: origin to next-expected sequence
///
/// An origin absent from the map is equivalent to next-expected = 1.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    pub want: BTreeMap<Origin, u32>,
}

/// A decoded gossip datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Rumor(Rumor),
    Status(Status),
}

impl Message {
    /// Serialize the message to a datagram payload
    pub fn encode(&self) -> Result<Vec<u8>> {
        let value = match self {
            Message::Rumor(rumor) => json!({
                KEY_CHAT_TEXT: rumor.text,
                KEY_ORIGIN: rumor.origin.as_str(),
                KEY_SEQ_NO: rumor.seq,
            }),
            Message::Status(status) => {
                let want: Map<String, Value> = status
                    .want
                    .iter()
                    .map(|(origin, next)| (origin.as_str().to_owned(), Value::from(*next)))
                    .collect();
                json!({ KEY_WANT: want })
            }
        };
        Ok(serde_json::to_vec(&value)?)
    }

    /// Decode a datagram payload, rejecting malformed input
    ///
    /// `Want` wins when both discriminating keys are present; extra keys
    /// on a rumor are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let map = value
            .as_object()
            .ok_or_else(|| GossipError::InvalidMessage("payload is not a map".to_string()))?;

        if let Some(want) = map.get(KEY_WANT) {
            return decode_status(want);
        }
        if map.contains_key(KEY_CHAT_TEXT) {
            return decode_rumor(map);
        }
        Err(GossipError::InvalidMessage(
            "neither Want nor ChatText present".to_string(),
        ))
    }
}

fn decode_status(want: &Value) -> Result<Message> {
    let entries = want
        .as_object()
        .ok_or_else(|| GossipError::InvalidMessage("Want is not a map".to_string()))?;

    let mut parsed = BTreeMap::new();
    for (origin, next) in entries {
        parsed.insert(Origin::new(origin.clone()), decode_seq(next, "Want entry")?);
    }
    Ok(Message::Status(Status { want: parsed }))
}

fn decode_rumor(map: &Map<String, Value>) -> Result<Message> {
    let text = map
        .get(KEY_CHAT_TEXT)
        .and_then(Value::as_str)
        .ok_or_else(|| GossipError::InvalidMessage("ChatText is not a string".to_string()))?;
    let origin = map
        .get(KEY_ORIGIN)
        .and_then(Value::as_str)
        .ok_or_else(|| GossipError::InvalidMessage("Origin missing or not a string".to_string()))?;
    let seq = map
        .get(KEY_SEQ_NO)
        .ok_or_else(|| GossipError::InvalidMessage("SeqNo missing".to_string()))?;

    Ok(Message::Rumor(Rumor {
        origin: Origin::new(origin),
        seq: decode_seq(seq, KEY_SEQ_NO)?,
        text: text.to_owned(),
    }))
}

// Sequence numbers travel as signed 32-bit integers and start at 1.
fn decode_seq(value: &Value, field: &str) -> Result<u32> {
    let n = value
        .as_i64()
        .ok_or_else(|| GossipError::InvalidMessage(format!("{} is not an integer", field)))?;
    if !(1..=i64::from(i32::MAX)).contains(&n) {
        return Err(GossipError::InvalidMessage(format!(
            "{} out of range: {}",
            field, n
        )));
    }
    Ok(n as u32)
}
