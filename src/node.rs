//! Application wiring: storage → ledger → mempool → consensus → p2p.
//!
//! Subsystems see each other only through narrow capabilities, wired once
//! here at startup: consensus gets a broadcast handle and a commit hook,
//! p2p gets the four message handlers and a ledger read handle. The node
//! also exposes the submit/read surface the REST collaborator consumes.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::codec;
use crate::config::Config;
use crate::consensus::{ConsensusEngine, ConsensusOutbound, ConsensusStatus, Vote};
use crate::crypto::KeyPair;
use crate::ledger::{
    Block, Ledger, LedgerError, LedgerRead, Transaction, TxInput, TxOutput, TxType, Utxo,
};
use crate::mempool::{Mempool, MempoolError};
use crate::p2p::message::{ProposalPayload, VotePayload};
use crate::p2p::{MessageType, P2pHandler, P2pNode, P2pStatus, PeerSnapshot};
use crate::storage::Store;
use crate::types::{Address, Hash, Signature};

/// The signed-transaction submission form (hex-encoded identifiers).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTxInput {
    pub tx_id_hex: String,
    pub output_index: u32,
    pub signature_hex: String,
    pub public_key_hex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTxOutput {
    pub address_hex: String,
    pub amount: u64,
    pub tx_type: TxType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTx {
    pub version: u32,
    pub timestamp: i64,
    pub inputs: Vec<SubmitTxInput>,
    pub outputs: Vec<SubmitTxOutput>,
    #[serde(default)]
    pub memo: String,
    #[serde(default, with = "codec::b64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("malformed submission: {0}")]
    Malformed(String),
    #[error(transparent)]
    Rejected(#[from] LedgerError),
    #[error(transparent)]
    Mempool(#[from] MempoolError),
}

impl SubmitTx {
    /// Decodes the hex form into a ledger transaction, recomputing the
    /// canonical id.
    pub fn into_transaction(self) -> Result<Transaction, SubmitError> {
        let mut inputs = Vec::with_capacity(self.inputs.len());
        for input in self.inputs {
            let ref_tx = Hash::from_str(&input.tx_id_hex)
                .map_err(|_| SubmitError::Malformed(format!("tx id {}", input.tx_id_hex)))?;
            let sig_bytes = hex::decode(&input.signature_hex)
                .map_err(|_| SubmitError::Malformed("signature hex".into()))?;
            let signature = Signature::from_der(sig_bytes)
                .ok_or_else(|| SubmitError::Malformed("signature exceeds 72 bytes".into()))?;
            let public_key = hex::decode(&input.public_key_hex)
                .map_err(|_| SubmitError::Malformed("public key hex".into()))?;
            inputs.push(TxInput {
                ref_tx,
                ref_index: input.output_index,
                signature,
                public_key,
            });
        }
        let mut outputs = Vec::with_capacity(self.outputs.len());
        for output in self.outputs {
            let address = Address::from_str(&output.address_hex)
                .map_err(|_| SubmitError::Malformed(format!("address {}", output.address_hex)))?;
            outputs.push(TxOutput {
                address,
                amount: output.amount,
                tx_type: output.tx_type,
            });
        }
        let mut tx = Transaction::new(self.timestamp, inputs, outputs, self.memo, self.data)
            .map_err(|err| SubmitError::Malformed(err.to_string()))?;
        tx.version = self.version;
        tx.id = tx.compute_id().map_err(|err| SubmitError::Malformed(err.to_string()))?;
        Ok(tx)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub network_id: String,
    pub node_id: String,
    pub latest_height: u64,
    pub latest_hash: Hash,
    pub mempool_size: usize,
    pub peer_count: usize,
}

/// Consensus broadcast capability backed by p2p.
struct Outbound {
    p2p: Arc<P2pNode>,
}

impl ConsensusOutbound for Outbound {
    fn broadcast_proposal(&self, height: u64, round: u32, block: &Block) {
        self.p2p.broadcast(
            MessageType::Proposal,
            &ProposalPayload {
                height,
                round,
                block: block.clone(),
            },
        );
    }

    fn broadcast_vote(&self, vote: &Vote) {
        self.p2p
            .broadcast(MessageType::Vote, &VotePayload { vote: vote.clone() });
    }

    fn request_sync(&self) {
        let p2p = Arc::clone(&self.p2p);
        tokio::spawn(async move { p2p.sync_blocks().await });
    }
}

/// Message handlers p2p dispatches into.
struct Handlers {
    consensus: Arc<ConsensusEngine>,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
}

impl P2pHandler for Handlers {
    fn on_block(&self, block: Block, from: &str) {
        let height = block.height();
        match self.consensus.commit_external_block(block) {
            Ok(true) => {}
            Ok(false) => debug!(height, from, "block not applicable yet"),
            Err(err) => warn!(%err, height, from, "rejected peer block"),
        }
    }

    fn on_transaction(&self, tx: Transaction, from: &str) {
        match self.ledger.validate_tx(&tx) {
            Ok(fee) => {
                if let Err(err) = self.mempool.insert(tx, fee) {
                    debug!(%err, from, "gossiped transaction already pending");
                }
            }
            Err(err) => debug!(%err, from, "dropping invalid gossiped transaction"),
        }
    }

    fn on_proposal(&self, round: u32, block: Block, _from: &str) {
        self.consensus.on_proposal(round, block);
    }

    fn on_vote(&self, vote: Vote, _from: &str) {
        self.consensus.on_vote(vote);
    }
}

pub struct Node {
    config: Config,
    ledger: Arc<Ledger>,
    mempool: Arc<Mempool>,
    consensus: Arc<ConsensusEngine>,
    p2p: Arc<P2pNode>,
    stop_tx: watch::Sender<bool>,
    stop_rx: watch::Receiver<bool>,
}

impl Node {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        if let Some(parent) = config.db.path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let store = Store::open(&config.db.path).context("open database")?;
        let ledger = Arc::new(Ledger::open(store, config.ledger_config()).context("open ledger")?);
        let mempool = Arc::new(Mempool::new());

        // Validator set: persisted snapshot wins over the genesis config so
        // stake adjustments survive restarts.
        let validators = match ledger.load_validator_set()? {
            Some(set) => set,
            None => {
                let set = config.validator_set()?;
                ledger.save_validator_set(&set)?;
                set
            }
        };

        let local = load_or_create_keypair(&config)?;
        if let Some(kp) = &local {
            info!(address = %kp.address(), "node key loaded");
        }

        let consensus = Arc::new(ConsensusEngine::new(
            Arc::clone(&ledger),
            Arc::clone(&mempool),
            validators,
            local,
            config.produces_blocks(),
        ));

        let (stop_tx, stop_rx) = watch::channel(false);
        let p2p = Arc::new(P2pNode::new(
            config.p2p_config(),
            Arc::clone(&ledger) as Arc<dyn LedgerRead>,
            stop_rx.clone(),
        ));

        consensus.set_outbound(Arc::new(Outbound {
            p2p: Arc::clone(&p2p),
        }));
        let p2p_hook = Arc::clone(&p2p);
        consensus.set_on_commit(move |block| p2p_hook.broadcast_block(block));
        p2p.set_handler(Arc::new(Handlers {
            consensus: Arc::clone(&consensus),
            ledger: Arc::clone(&ledger),
            mempool: Arc::clone(&mempool),
        }));

        let node = Self {
            config,
            ledger,
            mempool,
            consensus,
            p2p,
            stop_tx,
            stop_rx,
        };
        node.ensure_genesis()?;
        Ok(node)
    }

    /// A producer on an empty chain constructs and commits genesis;
    /// sync-only nodes wait and receive it via p2p.
    fn ensure_genesis(&self) -> anyhow::Result<()> {
        if self.ledger.tip().is_some() {
            return Ok(());
        }
        if !self.config.produces_blocks() {
            info!("empty chain; waiting for genesis from peers");
            return Ok(());
        }
        let addresses = self.config.genesis_addresses()?;
        let genesis = Ledger::genesis_block(
            &addresses,
            &self.config.genesis.system_balances,
            self.config.genesis.timestamp,
        )?;
        self.consensus
            .commit_external_block(genesis.clone())
            .context("commit genesis")?;
        info!(hash = %genesis.hash(), "genesis committed");
        Ok(())
    }

    pub async fn start(&self) -> anyhow::Result<()> {
        self.p2p.start().await.context("start p2p")?;
        self.consensus.start(self.stop_rx.clone());
        // One opportunistic pull once boot connections settle.
        let p2p = Arc::clone(&self.p2p);
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
            p2p.sync_blocks().await;
        });
        info!(network = %self.config.common.network_id, "node started");
        Ok(())
    }

    /// Signals every loop to wind down. In-flight writes complete; peer
    /// connections close as their read loops observe the stop channel.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
        info!("node stopping");
    }

    // ---- submit interface ------------------------------------------------

    /// Validates and admits a signed submission, gossips it, returns the
    /// computed id.
    pub fn submit_transaction(&self, submit: SubmitTx) -> Result<Hash, SubmitError> {
        let tx = submit.into_transaction()?;
        let fee = self.ledger.validate_tx(&tx)?;
        self.mempool.insert(tx.clone(), fee)?;
        self.p2p.broadcast_transaction(&tx);
        info!(id = %tx.id, fee, "transaction accepted");
        Ok(tx.id)
    }

    // ---- read API --------------------------------------------------------

    pub fn get_status(&self) -> NodeStatus {
        NodeStatus {
            network_id: self.config.common.network_id.clone(),
            node_id: self.p2p.node_id().to_string(),
            latest_height: self.ledger.latest_height(),
            latest_hash: self.ledger.latest_hash(),
            mempool_size: self.mempool.len(),
            peer_count: self.p2p.status().peer_count,
        }
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        self.ledger.get_block_by_height(height)
    }

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, LedgerError> {
        self.ledger.get_block_by_hash(hash)
    }

    pub fn get_tx(&self, id: &Hash) -> Result<Option<Transaction>, LedgerError> {
        self.ledger.get_transaction(id)
    }

    /// Unspent outputs for `address`. With `hide_pending`, outputs already
    /// claimed by an in-flight mempool transaction are filtered out.
    pub fn get_utxos(&self, address: &Address, hide_pending: bool) -> Result<Vec<Utxo>, LedgerError> {
        let mut utxos = self.ledger.utxos_for(address)?;
        if hide_pending {
            utxos.retain(|u| !self.mempool.conflicts(&u.ref_tx, u.ref_index));
        }
        Ok(utxos)
    }

    pub fn get_balance(&self, address: &Address, hide_pending: bool) -> Result<u64, LedgerError> {
        if !hide_pending {
            return self.ledger.balance(address);
        }
        Ok(self.get_utxos(address, true)?.iter().map(Utxo::amount).sum())
    }

    pub fn mempool_list(&self) -> Vec<Transaction> {
        self.mempool.list()
    }

    pub fn peers(&self) -> Vec<PeerSnapshot> {
        self.p2p.peer_snapshots()
    }

    pub fn p2p_status(&self) -> P2pStatus {
        self.p2p.status()
    }

    pub fn consensus_status(&self) -> ConsensusStatus {
        self.consensus.status()
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }
}

/// Loads the node key from `wallet.path` (hex-encoded PKCS#8 DER),
/// generating one for producing nodes that have none yet.
fn load_or_create_keypair(config: &Config) -> anyhow::Result<Option<KeyPair>> {
    let path = &config.wallet.path;
    if path.exists() {
        let raw = std::fs::read_to_string(path).context("read node key")?;
        let der = hex::decode(raw.trim()).context("decode node key hex")?;
        let kp = KeyPair::from_pkcs8_der(&der)
            .map_err(|err| anyhow::anyhow!("parse node key: {err}"))?;
        return Ok(Some(kp));
    }
    if !config.produces_blocks() {
        return Ok(None);
    }
    let kp = KeyPair::generate();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let der = kp
        .to_pkcs8_der()
        .map_err(|err| anyhow::anyhow!("encode node key: {err}"))?;
    std::fs::write(path, hex::encode(der)).context("write node key")?;
    info!(path = %path.display(), "generated node key");
    Ok(Some(kp))
}
