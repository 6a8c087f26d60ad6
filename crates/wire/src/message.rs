//! Wire message framing and parsing.
//!
//! Text messages are single lines; the gossip-data path is a JSON object on
//! one line. A listener peeks the first token (or the `{` of a JSON body)
//! to dispatch.

use gossipkv_common::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unrecognized message: {0:?}")]
    Unrecognized(String),
    #[error("bad gossip data payload: {0}")]
    BadJson(#[from] serde_json::Error),
}

/// A replicated write travelling between nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataGossip {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "VectorClock")]
    pub vector_clock: HashMap<String, u64>,
    #[serde(rename = "NodeID")]
    pub node_id: NodeId,
    /// Tombstone marker; omitted on the wire for live writes.
    #[serde(rename = "Deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

/// Every message of the gossip protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// `PING from {id}` — liveness probe, no reply.
    Ping { from: NodeId },
    /// `ELECTION from {id}` — bully challenge, answered with `OK`.
    Election { from: NodeId },
    /// `OK` — reply to an election challenge.
    ElectionOk,
    /// `COORDINATOR {id}` — leader announcement, no reply.
    Coordinator { id: NodeId },
    /// JSON gossip-data payload, no reply.
    Data(DataGossip),
}

impl Message {
    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> String {
        match self {
            Message::Ping { from } => format!("PING from {}\n", from),
            Message::Election { from } => format!("ELECTION from {}\n", from),
            Message::ElectionOk => "OK\n".to_string(),
            Message::Coordinator { id } => format!("COORDINATOR {}\n", id),
            Message::Data(data) => {
                let json = serde_json::to_string(data).expect("gossip data serializes");
                format!("{}\n", json)
            }
        }
    }

    /// Parse one received line.
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.starts_with('{') {
            let data: DataGossip = serde_json::from_str(line)?;
            return Ok(Message::Data(data));
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        match tokens.as_slice() {
            ["PING", "from", id] => Ok(Message::Ping {
                from: NodeId::from(*id),
            }),
            ["ELECTION", "from", id] => Ok(Message::Election {
                from: NodeId::from(*id),
            }),
            ["COORDINATOR", id] => Ok(Message::Coordinator {
                id: NodeId::from(*id),
            }),
            ["OK"] => Ok(Message::ElectionOk),
            _ => Err(DecodeError::Unrecognized(line.to_string())),
        }
    }
}
