//! The p2p node: listener, handshake, typed routing, flood relay,
//! pull sync, peer exchange and maintenance.
//!
//! Each peer runs its own read loop task; writes serialize on the peer's
//! connection lock; broadcasts spawn one sender task per peer. All loops
//! observe the shared stop channel.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, info, warn};

use crate::consensus::Vote;
use crate::ledger::{Block, LedgerRead, Transaction};
use crate::p2p::codec::{read_message, write_message, P2pError};
use crate::p2p::dedup::DedupCaches;
use crate::p2p::limiter::{RateLimiter, Verdict};
use crate::p2p::message::{
    BlockPayload, BlocksPayload, GetBlockPayload, GetBlocksPayload, GetPeersPayload,
    GetTxPayload, HandshakePayload, Message, MessageType, NewBlockPayload, NewTxPayload,
    PeerInfo, PeersPayload, PingPayload, PongPayload, ProposalPayload, TxPayload, VotePayload,
    PROTOCOL_VERSION,
};
use crate::p2p::peer::{Direction, Peer, PeerSnapshot};

/// A `Blocks` reply never carries more than this many blocks.
pub const SYNC_BATCH_MAX: u64 = 100;

pub const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(10);
pub const PEER_EVICT_AFTER: Duration = Duration::from_secs(120);
pub const DISCOVERY_INTERVAL: Duration = Duration::from_secs(30);
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DIALING_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct P2pConfig {
    pub address: String,
    pub port: u16,
    pub network_id: String,
    pub boot_nodes: Vec<String>,
}

/// Inbound dispatch capability; implemented by the application wiring.
/// `from` is the origin node id carried in the envelope.
pub trait P2pHandler: Send + Sync {
    fn on_block(&self, block: Block, from: &str);
    fn on_transaction(&self, tx: Transaction, from: &str);
    fn on_proposal(&self, round: u32, block: Block, from: &str);
    fn on_vote(&self, vote: Vote, from: &str);
}

#[derive(Debug, Clone, Serialize)]
pub struct P2pStatus {
    pub node_id: String,
    pub listen_addr: String,
    pub network_id: String,
    pub peer_count: usize,
    pub peers: Vec<PeerSnapshot>,
}

pub struct P2pNode {
    cfg: P2pConfig,
    node_id: String,
    ledger: Arc<dyn LedgerRead>,
    handler: RwLock<Option<Arc<dyn P2pHandler>>>,
    peers: RwLock<HashMap<String, Arc<Peer>>>,
    /// Outbound dials in flight, keyed by address. Prevents duplicate
    /// connections racing to the same node.
    dialing: Mutex<HashMap<String, Instant>>,
    dedup: DedupCaches,
    limiter: RateLimiter,
    stop: watch::Receiver<bool>,
}

impl P2pNode {
    pub fn new(cfg: P2pConfig, ledger: Arc<dyn LedgerRead>, stop: watch::Receiver<bool>) -> Self {
        Self {
            cfg,
            node_id: uuid::Uuid::new_v4().to_string(),
            ledger,
            handler: RwLock::new(None),
            peers: RwLock::new(HashMap::new()),
            dialing: Mutex::new(HashMap::new()),
            dedup: DedupCaches::new(),
            limiter: RateLimiter::new(),
            stop,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Wires the message handlers. Called once at startup, before `start`.
    pub fn set_handler(&self, handler: Arc<dyn P2pHandler>) {
        *self.handler.write().unwrap() = Some(handler);
    }

    pub fn status(&self) -> P2pStatus {
        let peers = self.peers.read().unwrap();
        P2pStatus {
            node_id: self.node_id.clone(),
            listen_addr: format!("{}:{}", self.cfg.address, self.cfg.port),
            network_id: self.cfg.network_id.clone(),
            peer_count: peers.values().filter(|p| p.is_active()).count(),
            peers: peers.values().map(|p| p.snapshot()).collect(),
        }
    }

    pub fn peer_snapshots(&self) -> Vec<PeerSnapshot> {
        self.peers
            .read()
            .unwrap()
            .values()
            .map(|p| p.snapshot())
            .collect()
    }

    /// Binds the listener and spawns the accept, maintenance and discovery
    /// loops, then dials the configured boot nodes.
    pub async fn start(self: &Arc<Self>) -> Result<(), P2pError> {
        let listen = format!("{}:{}", self.cfg.address, self.cfg.port);
        let listener = TcpListener::bind(&listen).await?;
        info!(%listen, node_id = %self.node_id, "p2p listening");

        let node = Arc::clone(self);
        let mut stop = self.stop.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok((stream, addr)) => {
                            let node = Arc::clone(&node);
                            tokio::spawn(async move {
                                if let Err(err) = node.handle_inbound(stream, addr.to_string()).await {
                                    debug!(%addr, %err, "inbound connection closed");
                                }
                            });
                        }
                        Err(err) => warn!(%err, "accept failed"),
                    },
                    _ = stop.changed() => {
                        info!("p2p listener stopped");
                        break;
                    }
                }
            }
        });

        let node = Arc::clone(self);
        tokio::spawn(async move { node.maintenance_loop().await });
        let node = Arc::clone(self);
        tokio::spawn(async move { node.discovery_loop().await });

        for addr in self.cfg.boot_nodes.clone() {
            let node = Arc::clone(self);
            tokio::spawn(async move { node.dial(addr).await });
        }
        Ok(())
    }

    fn own_handshake(&self) -> HandshakePayload {
        HandshakePayload {
            version: PROTOCOL_VERSION,
            node_id: self.node_id.clone(),
            network_id: self.cfg.network_id.clone(),
            listen_port: self.cfg.port,
            best_height: self.ledger.latest_height(),
            best_hash: self.ledger.latest_hash(),
        }
    }

    // ---- connection setup ------------------------------------------------

    /// Dials `addr`, performs the handshake and enters the read loop.
    pub async fn dial(self: &Arc<Self>, addr: String) {
        {
            let mut dialing = self.dialing.lock().unwrap();
            let now = Instant::now();
            dialing.retain(|_, started| now.duration_since(*started) < DIALING_TTL);
            if dialing.contains_key(&addr) {
                return;
            }
            dialing.insert(addr.clone(), now);
        }
        if self.known_address(&addr) {
            self.dialing.lock().unwrap().remove(&addr);
            return;
        }

        let result = self.dial_inner(&addr).await;
        self.dialing.lock().unwrap().remove(&addr);
        if let Err(err) = result {
            debug!(%addr, %err, "dial failed");
        }
    }

    async fn dial_inner(self: &Arc<Self>, addr: &str) -> Result<(), P2pError> {
        let stream = timeout(DIAL_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| P2pError::ReadTimeout)??;
        let (mut read_half, mut write_half) = stream.into_split();

        let hello = Message::encode(MessageType::Handshake, &self.own_handshake(), &self.node_id)?;
        write_message(&mut write_half, &hello).await?;

        let ack = timeout(DIAL_TIMEOUT, read_message(&mut read_half))
            .await
            .map_err(|_| P2pError::ReadTimeout)??;
        if ack.kind != MessageType::HandshakeAck {
            return Err(P2pError::BadHandshake(ack.kind.into()));
        }
        let theirs: HandshakePayload = ack.decode_payload()?;
        self.check_network(&theirs)?;
        self.admit_peer(
            write_half,
            addr.to_string(),
            Direction::Outbound,
            theirs,
            &mut read_half,
        )
        .await
    }

    async fn handle_inbound(
        self: &Arc<Self>,
        stream: TcpStream,
        addr: String,
    ) -> Result<(), P2pError> {
        let (mut read_half, mut write_half) = stream.into_split();
        let first = timeout(DIAL_TIMEOUT, read_message(&mut read_half))
            .await
            .map_err(|_| P2pError::ReadTimeout)??;
        if first.kind != MessageType::Handshake {
            return Err(P2pError::BadHandshake(first.kind.into()));
        }
        let theirs: HandshakePayload = first.decode_payload()?;
        // Wrong network: terminate before acknowledging.
        self.check_network(&theirs)?;

        let ack = Message::encode(
            MessageType::HandshakeAck,
            &self.own_handshake(),
            &self.node_id,
        )?;
        write_message(&mut write_half, &ack).await?;
        self.admit_peer(write_half, addr, Direction::Inbound, theirs, &mut read_half)
            .await
    }

    fn check_network(&self, theirs: &HandshakePayload) -> Result<(), P2pError> {
        if theirs.network_id != self.cfg.network_id {
            return Err(P2pError::NetworkMismatch {
                ours: self.cfg.network_id.clone(),
                theirs: theirs.network_id.clone(),
            });
        }
        Ok(())
    }

    /// Shared tail of both handshake directions: register, request peers,
    /// run the read loop until disconnect.
    async fn admit_peer(
        self: &Arc<Self>,
        write_half: tokio::net::tcp::OwnedWriteHalf,
        remote_addr: String,
        direction: Direction,
        theirs: HandshakePayload,
        read_half: &mut OwnedReadHalf,
    ) -> Result<(), P2pError> {
        if theirs.node_id == self.node_id {
            debug!("dropping connection to self");
            return Ok(());
        }

        let host = remote_addr
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| remote_addr.clone());
        let listen_addr = Some(format!("{host}:{}", theirs.listen_port));
        let peer = Arc::new(Peer::new(
            theirs.node_id.clone(),
            remote_addr,
            direction,
            write_half,
        ));
        peer.activate(theirs.best_height, theirs.best_hash, listen_addr);

        {
            let mut peers = self.peers.write().unwrap();
            if peers.contains_key(&theirs.node_id) {
                debug!(peer = %theirs.node_id, "duplicate connection dropped");
                return Ok(());
            }
            peers.insert(theirs.node_id.clone(), Arc::clone(&peer));
        }
        info!(
            peer = %theirs.node_id,
            addr = %peer.remote_addr,
            best_height = theirs.best_height,
            "peer active"
        );

        // Ask the fresh peer for its view of the network.
        let get_peers = Message::encode(MessageType::GetPeers, &GetPeersPayload {}, &self.node_id)?;
        peer.send_quiet(&get_peers).await;

        let result = self.read_loop(Arc::clone(&peer), read_half).await;
        self.peers.write().unwrap().remove(&peer.node_id);
        self.limiter.forget(&peer.node_id);
        info!(peer = %peer.node_id, "peer disconnected");
        result
    }

    async fn read_loop(
        self: &Arc<Self>,
        peer: Arc<Peer>,
        read_half: &mut OwnedReadHalf,
    ) -> Result<(), P2pError> {
        let mut stop = self.stop.clone();
        loop {
            tokio::select! {
                msg = read_message(read_half) => {
                    let msg = msg?;
                    self.dispatch(&peer, msg).await;
                }
                _ = stop.changed() => return Ok(()),
            }
        }
    }

    fn known_address(&self, addr: &str) -> bool {
        let peers = self.peers.read().unwrap();
        peers
            .values()
            .any(|p| p.remote_addr == addr || p.listen_addr().as_deref() == Some(addr))
    }

    // ---- routing ---------------------------------------------------------

    async fn dispatch(self: &Arc<Self>, peer: &Arc<Peer>, msg: Message) {
        peer.touch();
        if msg.from == self.node_id {
            // Our own broadcast echoed back through the flood.
            return;
        }
        match self.limiter.check(&peer.node_id, msg.kind) {
            Verdict::Allow => {}
            Verdict::Drop => {
                debug!(peer = %peer.node_id, kind = ?msg.kind, "per-type rate cap hit");
                return;
            }
            Verdict::Banned => {
                debug!(peer = %peer.node_id, "message from banned peer dropped");
                return;
            }
        }

        match msg.kind {
            MessageType::Handshake | MessageType::HandshakeAck => {
                // Session is already established; repeated handshakes are noise.
            }
            MessageType::Ping => {
                if let Ok(ping) = msg.decode_payload::<PingPayload>() {
                    peer.record_best(ping.best_height);
                    let pong = PongPayload {
                        nonce: ping.nonce,
                        best_height: self.ledger.latest_height(),
                    };
                    if let Ok(reply) = Message::encode(MessageType::Pong, &pong, &self.node_id) {
                        peer.send_quiet(&reply).await;
                    }
                }
            }
            MessageType::Pong => {
                if let Ok(pong) = msg.decode_payload::<PongPayload>() {
                    peer.record_best(pong.best_height);
                }
            }
            MessageType::NewBlock => {
                if !self
                    .dedup
                    .first_sight_content(msg.kind.into(), &msg.from, &msg.payload)
                {
                    return;
                }
                if let Ok(payload) = msg.decode_payload::<NewBlockPayload>() {
                    peer.record_best(payload.block.height());
                    self.invoke(|h| h.on_block(payload.block.clone(), &msg.from));
                }
                self.relay(&msg, &peer.node_id).await;
            }
            MessageType::NewTx => {
                if !self
                    .dedup
                    .first_sight_content(msg.kind.into(), &msg.from, &msg.payload)
                {
                    return;
                }
                if let Ok(payload) = msg.decode_payload::<NewTxPayload>() {
                    self.invoke(|h| h.on_transaction(payload.transaction.clone(), &msg.from));
                }
                self.relay(&msg, &peer.node_id).await;
            }
            MessageType::Proposal => {
                let Ok(payload) = msg.decode_payload::<ProposalPayload>() else {
                    return;
                };
                if !self.dedup.first_sight_proposal(
                    payload.height,
                    payload.round,
                    &payload.block.proposer,
                ) {
                    return;
                }
                self.invoke(|h| h.on_proposal(payload.round, payload.block.clone(), &msg.from));
                self.relay(&msg, &peer.node_id).await;
            }
            MessageType::Vote => {
                let Ok(payload) = msg.decode_payload::<VotePayload>() else {
                    return;
                };
                if !self.dedup.first_sight_vote(
                    payload.vote.height,
                    payload.vote.round,
                    payload.vote.kind,
                    &payload.vote.voter,
                ) {
                    return;
                }
                self.invoke(|h| h.on_vote(payload.vote.clone(), &msg.from));
                self.relay(&msg, &peer.node_id).await;
            }
            MessageType::GetBlocks => {
                if let Ok(req) = msg.decode_payload::<GetBlocksPayload>() {
                    self.serve_blocks(peer, req).await;
                }
            }
            MessageType::Blocks => {
                if let Ok(payload) = msg.decode_payload::<BlocksPayload>() {
                    let mut blocks = payload.blocks;
                    blocks.sort_by_key(Block::height);
                    for block in blocks {
                        self.invoke(|h| h.on_block(block.clone(), &msg.from));
                    }
                }
            }
            MessageType::GetBlock => {
                if let Ok(req) = msg.decode_payload::<GetBlockPayload>() {
                    let reply = BlockPayload {
                        block: self.ledger.block_by_hash(&req.hash),
                    };
                    if let Ok(out) = Message::encode(MessageType::Block, &reply, &self.node_id) {
                        peer.send_quiet(&out).await;
                    }
                }
            }
            MessageType::Block => {
                if let Ok(payload) = msg.decode_payload::<BlockPayload>() {
                    if let Some(block) = payload.block {
                        self.invoke(|h| h.on_block(block.clone(), &msg.from));
                    }
                }
            }
            MessageType::GetTx => {
                if let Ok(req) = msg.decode_payload::<GetTxPayload>() {
                    let reply = TxPayload {
                        transaction: self.ledger.transaction(&req.id),
                    };
                    if let Ok(out) = Message::encode(MessageType::Tx, &reply, &self.node_id) {
                        peer.send_quiet(&out).await;
                    }
                }
            }
            MessageType::Tx => {
                if let Ok(payload) = msg.decode_payload::<TxPayload>() {
                    if let Some(tx) = payload.transaction {
                        self.invoke(|h| h.on_transaction(tx.clone(), &msg.from));
                    }
                }
            }
            MessageType::GetPeers => {
                let reply = PeersPayload {
                    peers: self.peer_exchange_list(&peer.node_id),
                };
                if let Ok(out) = Message::encode(MessageType::Peers, &reply, &self.node_id) {
                    peer.send_quiet(&out).await;
                }
            }
            MessageType::Peers => {
                if let Ok(payload) = msg.decode_payload::<PeersPayload>() {
                    self.dial_discovered(payload.peers);
                }
            }
        }
    }

    /// Dispatches to the registered handler, catching panics so one
    /// malformed peer cannot take the node down.
    fn invoke<F: FnOnce(&Arc<dyn P2pHandler>)>(&self, f: F) {
        let handler = self.handler.read().unwrap().clone();
        let Some(handler) = handler else {
            return;
        };
        if std::panic::catch_unwind(AssertUnwindSafe(|| f(&handler))).is_err() {
            warn!("message handler panicked");
        }
    }

    /// Flood relay: every Active peer except the direct sender and the
    /// origin. The envelope travels unchanged so the origin id survives.
    async fn relay(&self, msg: &Message, sender: &str) {
        let targets: Vec<Arc<Peer>> = {
            let peers = self.peers.read().unwrap();
            peers
                .values()
                .filter(|p| p.is_active() && p.node_id != sender && p.node_id != msg.from)
                .cloned()
                .collect()
        };
        for peer in targets {
            let msg = msg.clone();
            tokio::spawn(async move { peer.send_quiet(&msg).await });
        }
    }

    async fn serve_blocks(&self, peer: &Arc<Peer>, req: GetBlocksPayload) {
        let end = req.end.min(req.start.saturating_add(SYNC_BATCH_MAX - 1));
        let mut blocks = Vec::new();
        for height in req.start..=end {
            match self.ledger.block_by_height(height) {
                Some(block) => blocks.push(block),
                None => break,
            }
        }
        debug!(peer = %peer.node_id, start = req.start, count = blocks.len(), "serving block range");
        if let Ok(out) = Message::encode(
            MessageType::Blocks,
            &BlocksPayload { blocks },
            &self.node_id,
        ) {
            peer.send_quiet(&out).await;
        }
    }

    fn peer_exchange_list(&self, requester: &str) -> Vec<PeerInfo> {
        let peers = self.peers.read().unwrap();
        peers
            .values()
            .filter(|p| p.is_active() && p.node_id != requester)
            .filter_map(|p| {
                p.listen_addr().map(|address| PeerInfo {
                    node_id: p.node_id.clone(),
                    address,
                })
            })
            .collect()
    }

    fn dial_discovered(self: &Arc<Self>, discovered: Vec<PeerInfo>) {
        let known: Vec<String> = {
            let peers = self.peers.read().unwrap();
            peers.keys().cloned().collect()
        };
        for info in discovered {
            if info.node_id == self.node_id || known.contains(&info.node_id) {
                continue;
            }
            let node = Arc::clone(self);
            tokio::spawn(async move { node.dial(info.address).await });
        }
    }

    // ---- broadcast & sync ------------------------------------------------

    /// Sends `payload` to every Active peer, one sender task per peer.
    pub fn broadcast<T: Serialize>(&self, kind: MessageType, payload: &T) {
        let msg = match Message::encode(kind, payload, &self.node_id) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%err, "broadcast encode failed");
                return;
            }
        };
        let targets: Vec<Arc<Peer>> = {
            let peers = self.peers.read().unwrap();
            peers.values().filter(|p| p.is_active()).cloned().collect()
        };
        for peer in targets {
            let msg = msg.clone();
            tokio::spawn(async move { peer.send_quiet(&msg).await });
        }
    }

    pub fn broadcast_block(&self, block: &Block) {
        self.broadcast(
            MessageType::NewBlock,
            &NewBlockPayload {
                block: block.clone(),
            },
        );
    }

    pub fn broadcast_transaction(&self, tx: &Transaction) {
        self.broadcast(
            MessageType::NewTx,
            &NewTxPayload {
                transaction: tx.clone(),
            },
        );
    }

    /// Pull sync: asks the best peer for the missing range. Invoked on
    /// consensus timeout escalation and on demand.
    pub async fn sync_blocks(&self) {
        let local_empty = self.ledger.is_empty();
        let local_height = self.ledger.latest_height();
        let best = {
            let peers = self.peers.read().unwrap();
            peers
                .values()
                .filter(|p| p.is_active())
                .filter(|p| {
                    p.best_height() > local_height || (local_empty && !p.best_hash().is_zero())
                })
                .max_by_key(|p| p.best_height())
                .cloned()
        };
        let Some(peer) = best else {
            debug!("no peer ahead of local chain");
            return;
        };
        let start = if local_empty { 0 } else { local_height + 1 };
        let req = GetBlocksPayload {
            start,
            end: peer.best_height(),
        };
        info!(peer = %peer.node_id, start, end = req.end, "requesting block sync");
        if let Ok(msg) = Message::encode(MessageType::GetBlocks, &req, &self.node_id) {
            peer.send_quiet(&msg).await;
        }
    }

    // ---- background loops ------------------------------------------------

    /// Every 10 s: ping Active peers, evict the silent, redial boot nodes
    /// when the peer table runs dry.
    async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = interval(MAINTENANCE_INTERVAL);
        let mut stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let stale: Vec<String> = {
                        let peers = self.peers.read().unwrap();
                        peers
                            .values()
                            .filter(|p| p.last_seen().elapsed() > PEER_EVICT_AFTER)
                            .map(|p| p.node_id.clone())
                            .collect()
                    };
                    if !stale.is_empty() {
                        let mut peers = self.peers.write().unwrap();
                        for id in &stale {
                            peers.remove(id);
                            self.limiter.forget(id);
                            info!(peer = %id, "evicting silent peer");
                        }
                    }

                    self.broadcast(
                        MessageType::Ping,
                        &PingPayload {
                            nonce: rand::random(),
                            best_height: self.ledger.latest_height(),
                        },
                    );

                    let no_active = !self
                        .peers
                        .read()
                        .unwrap()
                        .values()
                        .any(|p| p.is_active());
                    if no_active {
                        for addr in self.cfg.boot_nodes.clone() {
                            let node = Arc::clone(&self);
                            tokio::spawn(async move { node.dial(addr).await });
                        }
                    }
                }
                _ = stop.changed() => break,
            }
        }
    }

    /// Every 30 s: one `GetPeers` to each Active peer.
    async fn discovery_loop(self: Arc<Self>) {
        let mut ticker = interval(DISCOVERY_INTERVAL);
        let mut stop = self.stop.clone();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.broadcast(MessageType::GetPeers, &GetPeersPayload {});
                }
                _ = stop.changed() => break,
            }
        }
    }
}
