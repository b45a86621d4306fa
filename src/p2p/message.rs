//! Typed wire messages.
//!
//! Every frame carries one envelope `{"type", "payload", "from",
//! "timestamp"}` where `payload` is the base64 of an inner JSON value.
//! The type numbering is fixed; renumbering is a network-wide fork.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::consensus::Vote;
use crate::ledger::{now_unix, Block, Transaction};
use crate::types::Hash;

pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageType {
    Handshake = 0,
    HandshakeAck = 1,
    NewBlock = 2,
    GetBlock = 3,
    Block = 4,
    GetBlocks = 5,
    Blocks = 6,
    NewTx = 7,
    GetTx = 8,
    Tx = 9,
    Ping = 10,
    Pong = 11,
    GetPeers = 12,
    Peers = 13,
    Proposal = 14,
    Vote = 15,
}

impl From<MessageType> for u8 {
    fn from(t: MessageType) -> u8 {
        t as u8
    }
}

impl TryFrom<u8> for MessageType {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Ok(match v {
            0 => MessageType::Handshake,
            1 => MessageType::HandshakeAck,
            2 => MessageType::NewBlock,
            3 => MessageType::GetBlock,
            4 => MessageType::Block,
            5 => MessageType::GetBlocks,
            6 => MessageType::Blocks,
            7 => MessageType::NewTx,
            8 => MessageType::GetTx,
            9 => MessageType::Tx,
            10 => MessageType::Ping,
            11 => MessageType::Pong,
            12 => MessageType::GetPeers,
            13 => MessageType::Peers,
            14 => MessageType::Proposal,
            15 => MessageType::Vote,
            other => return Err(format!("unknown message type {other}")),
        })
    }
}

impl MessageType {
    /// Flood-relayed types: forwarded to every Active peer except the
    /// sender and the origin, after deduplication.
    pub fn is_flooded(&self) -> bool {
        matches!(
            self,
            MessageType::NewBlock | MessageType::NewTx | MessageType::Proposal | MessageType::Vote
        )
    }
}

/// The framed envelope. `from` is the origin node id and survives relay
/// unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(with = "codec::b64")]
    pub payload: Vec<u8>,
    pub from: String,
    pub timestamp: i64,
}

impl Message {
    pub fn encode<T: Serialize>(
        kind: MessageType,
        payload: &T,
        from: &str,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            kind,
            payload: serde_json::to_vec(payload)?,
            from: from.to_string(),
            timestamp: now_unix(),
        })
    }

    pub fn decode_payload<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.payload)
    }
}

// ---- inner payloads (fixed field orders) --------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandshakePayload {
    pub version: u32,
    pub node_id: String,
    pub network_id: String,
    pub listen_port: u16,
    pub best_height: u64,
    pub best_hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlockPayload {
    pub hash: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockPayload {
    pub block: Option<Block>,
}

/// Pull-sync request for the inclusive range `[start, end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub start: u64,
    pub end: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksPayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTxPayload {
    pub transaction: Transaction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTxPayload {
    pub id: Hash,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPayload {
    pub transaction: Option<Transaction>,
}

/// Liveness probe; both sides piggyback their best height so sync peer
/// selection stays fresh between handshakes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingPayload {
    pub nonce: u64,
    pub best_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PongPayload {
    pub nonce: u64,
    pub best_height: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPeersPayload {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerInfo {
    pub node_id: String,
    pub address: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersPayload {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalPayload {
    pub height: u64,
    pub round: u32,
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotePayload {
    pub vote: Vote,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_numbering_is_fixed() {
        assert_eq!(u8::from(MessageType::Handshake), 0);
        assert_eq!(u8::from(MessageType::Blocks), 6);
        assert_eq!(u8::from(MessageType::Ping), 10);
        assert_eq!(u8::from(MessageType::Vote), 15);
        assert_eq!(MessageType::try_from(14).unwrap(), MessageType::Proposal);
        assert!(MessageType::try_from(16).is_err());
    }

    #[test]
    fn envelope_serializes_type_as_number_and_payload_as_base64() {
        let msg = Message::encode(
            MessageType::Ping,
            &PingPayload {
                nonce: 7,
                best_height: 3,
            },
            "node-a",
        )
        .unwrap();
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], 10);
        assert!(json["payload"].is_string());
        assert_eq!(json["from"], "node-a");
    }

    #[test]
    fn payload_round_trip() {
        let msg = Message::encode(
            MessageType::GetBlocks,
            &GetBlocksPayload { start: 1, end: 100 },
            "n",
        )
        .unwrap();
        let raw = serde_json::to_vec(&msg).unwrap();
        let back: Message = serde_json::from_slice(&raw).unwrap();
        let payload: GetBlocksPayload = back.decode_payload().unwrap();
        assert_eq!(payload.start, 1);
        assert_eq!(payload.end, 100);
    }

    #[test]
    fn flooded_types() {
        assert!(MessageType::NewBlock.is_flooded());
        assert!(MessageType::Vote.is_flooded());
        assert!(!MessageType::GetBlocks.is_flooded());
        assert!(!MessageType::Pong.is_flooded());
    }
}
