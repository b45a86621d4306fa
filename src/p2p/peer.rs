//! Peer bookkeeping and the per-connection write half.

use std::time::Instant;

use serde::Serialize;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::p2p::codec::{write_message, P2pError};
use crate::p2p::message::Message;
use crate::types::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerState {
    Connecting,
    Handshaking,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

#[derive(Debug)]
pub struct PeerMeta {
    pub state: PeerState,
    pub best_height: u64,
    pub best_hash: Hash,
    /// Dialable `host:port` learned from the handshake's listen port.
    pub listen_addr: Option<String>,
    pub last_seen: Instant,
}

/// One connected peer. Writes from any task serialize on the connection's
/// write lock; broadcast packing happens in [`write_message`].
pub struct Peer {
    pub node_id: String,
    pub remote_addr: String,
    pub direction: Direction,
    writer: AsyncMutex<OwnedWriteHalf>,
    meta: std::sync::Mutex<PeerMeta>,
}

/// Immutable view for the read API.
#[derive(Debug, Clone, Serialize)]
pub struct PeerSnapshot {
    pub node_id: String,
    pub remote_addr: String,
    pub direction: Direction,
    pub state: PeerState,
    pub best_height: u64,
    pub listen_addr: Option<String>,
}

impl Peer {
    pub fn new(
        node_id: String,
        remote_addr: String,
        direction: Direction,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self {
            node_id,
            remote_addr,
            direction,
            writer: AsyncMutex::new(writer),
            meta: std::sync::Mutex::new(PeerMeta {
                state: PeerState::Handshaking,
                best_height: 0,
                best_hash: Hash::zero(),
                listen_addr: None,
                last_seen: Instant::now(),
            }),
        }
    }

    pub async fn send(&self, msg: &Message) -> Result<(), P2pError> {
        let mut writer = self.writer.lock().await;
        write_message(&mut *writer, msg).await
    }

    /// Fire-and-forget send; failures are logged and left for the read
    /// loop to surface as a disconnect.
    pub async fn send_quiet(&self, msg: &Message) {
        if let Err(err) = self.send(msg).await {
            debug!(peer = %self.node_id, %err, "send failed");
        }
    }

    pub fn activate(&self, best_height: u64, best_hash: Hash, listen_addr: Option<String>) {
        let mut meta = self.meta.lock().unwrap();
        meta.state = PeerState::Active;
        meta.best_height = best_height;
        meta.best_hash = best_hash;
        meta.listen_addr = listen_addr;
        meta.last_seen = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.meta.lock().unwrap().state == PeerState::Active
    }

    pub fn touch(&self) {
        self.meta.lock().unwrap().last_seen = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        self.meta.lock().unwrap().last_seen
    }

    pub fn best_height(&self) -> u64 {
        self.meta.lock().unwrap().best_height
    }

    pub fn best_hash(&self) -> Hash {
        self.meta.lock().unwrap().best_hash
    }

    pub fn record_best(&self, height: u64) {
        let mut meta = self.meta.lock().unwrap();
        if height > meta.best_height {
            meta.best_height = height;
        }
    }

    pub fn listen_addr(&self) -> Option<String> {
        self.meta.lock().unwrap().listen_addr.clone()
    }

    pub fn snapshot(&self) -> PeerSnapshot {
        let meta = self.meta.lock().unwrap();
        PeerSnapshot {
            node_id: self.node_id.clone(),
            remote_addr: self.remote_addr.clone(),
            direction: self.direction,
            state: meta.state,
            best_height: meta.best_height,
            listen_addr: meta.listen_addr.clone(),
        }
    }
}
