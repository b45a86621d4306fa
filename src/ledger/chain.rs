//! The ledger state machine: genesis, block assembly, the validation
//! pipeline, and the atomic commit path.
//!
//! The ledger owns the KV store. Consensus and p2p call through this API
//! and never touch keys directly. Every commit is a single write batch;
//! the in-memory tip cursor advances only after the batch lands.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};

use crate::consensus::validator::ValidatorSet;
use crate::crypto::{self, KeyPair};
use crate::ledger::block::{
    merkle_root, Block, MAX_FUTURE_DRIFT_SECS, MAX_TXS_PER_BLOCK,
};
use crate::ledger::error::{LedgerError, ValidationError};
use crate::ledger::tx::{Transaction, TxType};
use crate::ledger::utxo::{AccountSummary, Utxo};
use crate::mempool::Mempool;
use crate::storage::{keys, Batch, Store};
use crate::types::{Address, Hash};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub min_fee: u64,
    pub block_reward: u64,
    pub max_memo_size: usize,
    pub max_data_size: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            min_fee: 1,
            block_reward: 50,
            max_memo_size: 256,
            max_data_size: 1024,
        }
    }
}

/// Read capability the p2p layer depends on. Narrower than [`Ledger`]'s
/// full surface; wired once at startup.
pub trait LedgerRead: Send + Sync {
    fn latest_height(&self) -> u64;
    fn latest_hash(&self) -> Hash;
    fn is_empty(&self) -> bool;
    fn block_by_height(&self, height: u64) -> Option<Block>;
    fn block_by_hash(&self, hash: &Hash) -> Option<Block>;
    fn transaction(&self, id: &Hash) -> Option<Transaction>;
}

pub struct Ledger {
    store: Store,
    cfg: LedgerConfig,
    tip: RwLock<Option<(u64, Hash)>>,
}

impl Ledger {
    pub fn open(store: Store, cfg: LedgerConfig) -> Result<Self, LedgerError> {
        let height = store.get(keys::META_LATEST_HEIGHT)?;
        let hash = store.get(keys::META_LATEST_HASH)?;
        let tip = match (height, hash) {
            (Some(h), Some(hash)) => {
                let h = decode_height(&h)
                    .ok_or(LedgerError::CursorInvariant("malformed latest_height"))?;
                let hash = Hash::from_slice(&hash)
                    .ok_or(LedgerError::CursorInvariant("malformed latest_hash"))?;
                Some((h, hash))
            }
            (None, None) => None,
            _ => return Err(LedgerError::CursorInvariant("half-written meta cursor")),
        };
        Ok(Self {
            store,
            cfg,
            tip: RwLock::new(tip),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.cfg
    }

    pub fn tip(&self) -> Option<(u64, Hash)> {
        *self.tip.read().unwrap()
    }

    // ---- reads -----------------------------------------------------------

    pub fn get_block_by_hash(&self, hash: &Hash) -> Result<Option<Block>, LedgerError> {
        Ok(self.store.get_value(&keys::block(hash))?)
    }

    pub fn get_block_by_height(&self, height: u64) -> Result<Option<Block>, LedgerError> {
        match self.store.get(&keys::block_by_height(height))? {
            Some(raw) => match Hash::from_slice(&raw) {
                Some(hash) => self.get_block_by_hash(&hash),
                None => Err(LedgerError::CursorInvariant("malformed height index")),
            },
            None => Ok(None),
        }
    }

    pub fn get_transaction(&self, id: &Hash) -> Result<Option<Transaction>, LedgerError> {
        Ok(self.store.get_value(&keys::tx(id))?)
    }

    /// Hash of the block containing `id`, if committed.
    pub fn get_transaction_block(&self, id: &Hash) -> Result<Option<Hash>, LedgerError> {
        Ok(self
            .store
            .get(&keys::tx_block(id))?
            .and_then(|raw| Hash::from_slice(&raw)))
    }

    pub fn get_utxo(&self, ref_tx: &Hash, ref_index: u32) -> Result<Option<Utxo>, LedgerError> {
        Ok(self.store.get_value(&keys::utxo(ref_tx, ref_index))?)
    }

    /// Unspent outputs owned by `address`.
    pub fn utxos_for(&self, address: &Address) -> Result<Vec<Utxo>, LedgerError> {
        let set = self.load_addr_set(address)?;
        let mut out = Vec::with_capacity(set.len());
        for key in set {
            if let Some(utxo) = self.store.get_value::<Utxo>(key.as_bytes())? {
                if !utxo.spent {
                    out.push(utxo);
                }
            }
        }
        Ok(out)
    }

    pub fn balance(&self, address: &Address) -> Result<u64, LedgerError> {
        Ok(self.account(address)?.balance)
    }

    pub fn account(&self, address: &Address) -> Result<AccountSummary, LedgerError> {
        Ok(self
            .store
            .get_value(&keys::addr(address))?
            .unwrap_or_default())
    }

    pub fn load_validator_set(&self) -> Result<Option<ValidatorSet>, LedgerError> {
        Ok(self.store.get_value(keys::CONSENSUS_VALIDATORS)?)
    }

    pub fn save_validator_set(&self, set: &ValidatorSet) -> Result<(), LedgerError> {
        Ok(self.store.put_value(keys::CONSENSUS_VALIDATORS, set)?)
    }

    pub fn load_stakers(&self) -> Result<BTreeMap<Address, u64>, LedgerError> {
        Ok(self
            .store
            .get_value(keys::CONSENSUS_STAKERS)?
            .unwrap_or_default())
    }

    // ---- genesis ---------------------------------------------------------

    /// Deterministic genesis from the configured system accounts. Height 0,
    /// all-zero prev hash and proposer, one minting transaction.
    pub fn genesis_block(
        addresses: &[Address],
        balances: &[u64],
        timestamp: i64,
    ) -> Result<Block, LedgerError> {
        if addresses.len() != balances.len() {
            return Err(ValidationError::BadGenesis("address/balance length mismatch").into());
        }
        if addresses.is_empty() {
            return Err(ValidationError::BadGenesis("no funded addresses").into());
        }
        let outputs = addresses
            .iter()
            .zip(balances)
            .map(|(addr, amount)| crate::ledger::tx::TxOutput {
                address: *addr,
                amount: *amount,
                tx_type: TxType::Coinbase,
            })
            .collect();
        let tx = Transaction::new(timestamp, Vec::new(), outputs, "genesis".into(), Vec::new())?;
        Ok(Block::new(
            Hash::zero(),
            0,
            timestamp,
            Address::zero(),
            vec![tx],
        )?)
    }

    // ---- validation ------------------------------------------------------

    /// Validates a transaction against the committed UTXO set. Returns the
    /// implicit fee (`Σ inputs − Σ outputs`; zero for coinbase).
    pub fn validate_tx(&self, tx: &Transaction) -> Result<u64, LedgerError> {
        if tx.memo.len() > self.cfg.max_memo_size {
            return Err(ValidationError::OversizeMemo {
                max: self.cfg.max_memo_size,
            }
            .into());
        }
        if tx.data.len() > self.cfg.max_data_size {
            return Err(ValidationError::OversizeData {
                max: self.cfg.max_data_size,
            }
            .into());
        }
        let computed = tx.compute_id()?;
        if computed != tx.id {
            return Err(ValidationError::TxIdMismatch {
                stored: tx.id,
                computed,
            }
            .into());
        }
        if tx.outputs.iter().any(|o| o.amount == 0) {
            return Err(ValidationError::ZeroAmount.into());
        }

        if tx.is_coinbase() {
            if tx.outputs.is_empty() {
                return Err(ValidationError::BadCoinbase("no outputs").into());
            }
            return Ok(0);
        }

        let mut total_in: u128 = 0;
        for input in &tx.inputs {
            let utxo = self
                .get_utxo(&input.ref_tx, input.ref_index)?
                .ok_or(ValidationError::UnknownUtxo {
                    ref_tx: input.ref_tx,
                    ref_index: input.ref_index,
                })?;
            if utxo.spent {
                return Err(ValidationError::UtxoSpent {
                    ref_tx: input.ref_tx,
                    ref_index: input.ref_index,
                }
                .into());
            }
            let derived = crypto::address_of_public_key(&input.public_key)
                .map_err(|_| ValidationError::BadInputSignature)?;
            if derived != utxo.output.address {
                return Err(ValidationError::OwnerMismatch {
                    owner: utxo.output.address,
                    derived,
                }
                .into());
            }
            crypto::verify(&input.public_key, tx.id.as_bytes(), &input.signature)
                .map_err(|_| ValidationError::BadInputSignature)?;
            total_in += utxo.amount() as u128;
        }

        let total_out: u128 = tx.outputs.iter().map(|o| o.amount as u128).sum();
        if total_in < total_out + self.cfg.min_fee as u128 {
            return Err(ValidationError::InsufficientInputs {
                inputs: total_in as u64,
                outputs: total_out.min(u64::MAX as u128) as u64,
                min_fee: self.cfg.min_fee,
            }
            .into());
        }
        Ok((total_in - total_out) as u64)
    }

    /// The full block rejection chain. With `expect_quorum` the attached
    /// commit signatures must carry a two-thirds supermajority, required
    /// before every non-solo commit.
    pub fn validate_block(
        &self,
        block: &Block,
        expect_quorum: bool,
        validators: &ValidatorSet,
    ) -> Result<(), LedgerError> {
        if block.height() == 0 {
            return self.validate_genesis(block);
        }

        let (tip_height, tip_hash) = self
            .tip()
            .ok_or(ValidationError::BadGenesis("chain has no genesis"))?;
        if block.height() != tip_height + 1 {
            return Err(ValidationError::HeightMismatch {
                expected: tip_height + 1,
                got: block.height(),
            }
            .into());
        }
        if block.header.prev_hash != tip_hash {
            return Err(ValidationError::PrevHashMismatch.into());
        }

        let ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id).collect();
        if block.header.merkle_root != merkle_root(&ids) {
            return Err(ValidationError::MerkleMismatch.into());
        }
        if block.header.compute_hash()? != block.hash() {
            return Err(ValidationError::BlockHashMismatch.into());
        }

        let parent = self
            .get_block_by_hash(&tip_hash)?
            .ok_or(LedgerError::CursorInvariant("tip block missing"))?;
        if block.header.timestamp < parent.header.timestamp {
            return Err(ValidationError::TimestampBehindParent {
                parent: parent.header.timestamp,
                got: block.header.timestamp,
            }
            .into());
        }
        let now = now_unix();
        if block.header.timestamp > now + MAX_FUTURE_DRIFT_SECS {
            return Err(ValidationError::TimestampTooFarAhead {
                now,
                got: block.header.timestamp,
            }
            .into());
        }

        if block.proposer.is_zero() {
            return Err(ValidationError::EmptyProposer.into());
        }
        // Proposer membership and signature are checked against the active
        // set; a solo chain carries no validators and trusts its producer.
        if validators.active_count() > 0 {
            let validator = validators
                .get(&block.proposer)
                .filter(|v| v.is_active())
                .ok_or(ValidationError::UnknownProposer(block.proposer))?;
            crypto::verify(
                &validator.public_key,
                block.hash().as_bytes(),
                &block.proposer_signature,
            )
            .map_err(|_| ValidationError::BadProposerSignature)?;
        }

        if block.transactions.len() > MAX_TXS_PER_BLOCK {
            return Err(ValidationError::TooManyTransactions {
                max: MAX_TXS_PER_BLOCK,
                got: block.transactions.len(),
            }
            .into());
        }

        let mut seen_ids = HashSet::new();
        let mut seen_inputs = HashSet::new();
        for tx in &block.transactions {
            if !seen_ids.insert(tx.id) {
                return Err(ValidationError::DuplicateTx(tx.id).into());
            }
            for input in &tx.inputs {
                if !seen_inputs.insert((input.ref_tx, input.ref_index)) {
                    return Err(ValidationError::DuplicateInput {
                        ref_tx: input.ref_tx,
                        ref_index: input.ref_index,
                    }
                    .into());
                }
            }
        }

        // First transaction is the coinbase minting reward + fees; no other
        // transaction may be input-free.
        let Some(coinbase) = block.transactions.first() else {
            return Err(ValidationError::BadCoinbase("block has no transactions").into());
        };
        if !coinbase.is_coinbase() {
            return Err(ValidationError::BadCoinbase("first transaction has inputs").into());
        }
        let mut fees: u64 = 0;
        for tx in &block.transactions[1..] {
            if tx.is_coinbase() {
                return Err(ValidationError::BadCoinbase("coinbase outside first slot").into());
            }
            fees = fees.saturating_add(self.validate_tx(tx)?);
        }
        self.validate_tx(coinbase)?;
        let expected_mint = self.cfg.block_reward.saturating_add(fees);
        if coinbase.total_output() != expected_mint {
            return Err(ValidationError::BadCoinbase("reward does not match fees").into());
        }
        if coinbase.outputs[0].address != block.proposer {
            return Err(ValidationError::BadCoinbase("reward not paid to proposer").into());
        }

        if expect_quorum {
            self.verify_quorum(block, validators)?;
        }
        Ok(())
    }

    fn validate_genesis(&self, block: &Block) -> Result<(), LedgerError> {
        if self.tip().is_some() {
            return Err(ValidationError::HeightMismatch {
                expected: self.tip().map(|(h, _)| h + 1).unwrap_or(0),
                got: 0,
            }
            .into());
        }
        if !block.header.prev_hash.is_zero() {
            return Err(ValidationError::BadGenesis("prev_hash not zero").into());
        }
        let ids: Vec<Hash> = block.transactions.iter().map(|tx| tx.id).collect();
        if block.header.merkle_root != merkle_root(&ids) {
            return Err(ValidationError::MerkleMismatch.into());
        }
        if block.header.compute_hash()? != block.hash() {
            return Err(ValidationError::BlockHashMismatch.into());
        }
        for tx in &block.transactions {
            if !tx.inputs.is_empty() {
                return Err(ValidationError::BadGenesis("genesis transaction has inputs").into());
            }
            if tx.outputs.is_empty() || tx.outputs.iter().any(|o| o.amount == 0) {
                return Err(ValidationError::BadGenesis("non-positive genesis output").into());
            }
        }
        Ok(())
    }

    /// Verifies the quorum certificate: each signature individually against
    /// the block hash, each signer an active validator, the distinct-signer
    /// power sum past two thirds of the total.
    fn verify_quorum(&self, block: &Block, validators: &ValidatorSet) -> Result<(), LedgerError> {
        let total = validators.total_voting_power();
        let mut signed_power: u64 = 0;
        let mut seen = HashSet::new();
        for cs in &block.commit_signatures {
            let validator = validators
                .get(&cs.validator)
                .filter(|v| v.is_active())
                .ok_or(ValidationError::UnknownCommitSigner(cs.validator))?;
            crypto::verify(&validator.public_key, block.hash().as_bytes(), &cs.signature)
                .map_err(|_| ValidationError::BadCommitSignature(cs.validator))?;
            if seen.insert(cs.validator) {
                signed_power = signed_power.saturating_add(validator.voting_power);
            }
        }
        if signed_power as u128 * 3 <= total as u128 * 2 {
            return Err(ValidationError::QuorumNotReached {
                have: signed_power,
                total,
            }
            .into());
        }
        Ok(())
    }

    // ---- block assembly --------------------------------------------------

    /// Drains the mempool into a proposal: re-validates every candidate
    /// (evicting the invalid), skips spend conflicts, sums fees, prepends
    /// the coinbase, finalizes the header and signs it with the proposer
    /// key.
    pub fn build_block(
        &self,
        mempool: &Mempool,
        proposer: &KeyPair,
        timestamp: i64,
    ) -> Result<Block, LedgerError> {
        let (tip_height, tip_hash) = self
            .tip()
            .ok_or(ValidationError::BadGenesis("chain has no genesis"))?;
        let height = tip_height + 1;

        let mut included = Vec::new();
        let mut fees: u64 = 0;
        let mut claimed: HashSet<(Hash, u32)> = HashSet::new();
        for entry in mempool.take_for_block() {
            if included.len() + 1 >= MAX_TXS_PER_BLOCK {
                break;
            }
            if entry
                .tx
                .inputs
                .iter()
                .any(|i| claimed.contains(&(i.ref_tx, i.ref_index)))
            {
                // A pending sibling already spends this output; leave the
                // transaction for a later block or eviction.
                continue;
            }
            match self.validate_tx(&entry.tx) {
                Ok(fee) => {
                    for input in &entry.tx.inputs {
                        claimed.insert((input.ref_tx, input.ref_index));
                    }
                    fees = fees.saturating_add(fee);
                    included.push(entry.tx);
                }
                Err(LedgerError::Validation(reason)) => {
                    debug!(id = %entry.tx.id, %reason, "evicting invalid mempool transaction");
                    mempool.purge(&[entry.tx.id]);
                }
                Err(err) => return Err(err),
            }
        }

        let proposer_addr = proposer.address();
        let reward = self.cfg.block_reward.saturating_add(fees);
        let coinbase = Transaction::coinbase(proposer_addr, reward, height, timestamp)?;
        let mut transactions = Vec::with_capacity(included.len() + 1);
        transactions.push(coinbase);
        transactions.extend(included);

        let mut block = Block::new(tip_hash, height, timestamp, proposer_addr, transactions)?;
        block.proposer_signature = proposer.sign(block.hash().as_bytes());
        Ok(block)
    }

    // ---- commit ----------------------------------------------------------

    /// Commits a validated block atomically: block and transaction rows,
    /// UTXO diff, address indices, staker/validator updates, meta cursor.
    /// One batch, applied in full or not at all. Callers run
    /// [`Self::validate_block`] first.
    pub fn add_block(
        &self,
        block: &Block,
        validators: &mut ValidatorSet,
    ) -> Result<(), LedgerError> {
        let hash = block.hash();
        let height = block.height();

        // Resolve every spent output up front; owners feed the per-address
        // tables loaded once per block.
        let mut spent: HashMap<(Hash, u32), Utxo> = HashMap::new();
        for tx in &block.transactions {
            for input in &tx.inputs {
                let utxo = self
                    .get_utxo(&input.ref_tx, input.ref_index)?
                    .ok_or(ValidationError::UnknownUtxo {
                        ref_tx: input.ref_tx,
                        ref_index: input.ref_index,
                    })?;
                if utxo.spent {
                    return Err(ValidationError::UtxoSpent {
                        ref_tx: input.ref_tx,
                        ref_index: input.ref_index,
                    }
                    .into());
                }
                spent.insert((input.ref_tx, input.ref_index), utxo);
            }
        }

        let mut touched: BTreeSet<Address> = BTreeSet::new();
        for utxo in spent.values() {
            touched.insert(utxo.output.address);
        }
        for tx in &block.transactions {
            for out in &tx.outputs {
                touched.insert(out.address);
            }
        }

        let mut utxo_sets: HashMap<Address, BTreeSet<String>> = HashMap::new();
        let mut accounts: HashMap<Address, AccountSummary> = HashMap::new();
        let mut sent_lists: HashMap<Address, Vec<Hash>> = HashMap::new();
        let mut recv_lists: HashMap<Address, Vec<Hash>> = HashMap::new();
        for addr in &touched {
            utxo_sets.insert(*addr, self.load_addr_set(addr)?);
            accounts.insert(*addr, self.account(addr)?);
            sent_lists.insert(*addr, self.load_tx_list(&keys::addr_sent(addr))?);
            recv_lists.insert(*addr, self.load_tx_list(&keys::addr_recv(addr))?);
        }

        let mut stakers = self.load_stakers()?;
        let mut stake_ops = false;

        let mut batch = Batch::new();
        batch.put_value(keys::block(&hash), block)?;
        batch.put(keys::block_by_height(height), hash.as_bytes().to_vec());

        for tx in &block.transactions {
            batch.put_value(keys::tx(&tx.id), tx)?;
            batch.put(keys::tx_block(&tx.id), hash.as_bytes().to_vec());

            let mut senders: BTreeSet<Address> = BTreeSet::new();
            for (i, input) in tx.inputs.iter().enumerate() {
                batch.put_value(keys::tx_in(&tx.id, i as u32), input)?;
                let Some(mut utxo) = spent.remove(&(input.ref_tx, input.ref_index)) else {
                    // Duplicate inputs are rejected by validation; reaching
                    // this means the block bypassed it.
                    return Err(ValidationError::DuplicateInput {
                        ref_tx: input.ref_tx,
                        ref_index: input.ref_index,
                    }
                    .into());
                };
                let owner = utxo.output.address;
                let amount = utxo.amount();
                utxo.spent = true;
                utxo.spent_height = height;
                let ukey = keys::utxo(&input.ref_tx, input.ref_index);
                batch.put_value(ukey.clone(), &utxo)?;
                if let Some(set) = utxo_sets.get_mut(&owner) {
                    set.remove(&String::from_utf8_lossy(&ukey).into_owned());
                }
                if let Some(acct) = accounts.get_mut(&owner) {
                    acct.balance = acct.balance.saturating_sub(amount);
                }
                senders.insert(owner);
            }

            let mut recipients: BTreeSet<Address> = BTreeSet::new();
            for (i, out) in tx.outputs.iter().enumerate() {
                batch.put_value(keys::tx_out(&tx.id, i as u32), out)?;
                let utxo = Utxo::new(tx.id, i as u32, out.clone(), height);
                let ukey = keys::utxo(&tx.id, i as u32);
                batch.put_value(ukey.clone(), &utxo)?;
                if let Some(set) = utxo_sets.get_mut(&out.address) {
                    set.insert(String::from_utf8_lossy(&ukey).into_owned());
                }
                if let Some(acct) = accounts.get_mut(&out.address) {
                    acct.balance = acct.balance.saturating_add(out.amount);
                }
                recipients.insert(out.address);

                match out.tx_type {
                    TxType::Stake => {
                        let entry = stakers.entry(out.address).or_insert(0);
                        *entry = entry.saturating_add(out.amount);
                        validators.add_power(&out.address, out.amount);
                        stake_ops = true;
                    }
                    TxType::Unstake => {
                        let entry = stakers.entry(out.address).or_insert(0);
                        *entry = entry.saturating_sub(out.amount);
                        validators.sub_power(&out.address, out.amount);
                        stake_ops = true;
                    }
                    TxType::General | TxType::Coinbase => {}
                }
            }

            for addr in senders {
                if let Some(list) = sent_lists.get_mut(&addr) {
                    list.push(tx.id);
                }
                if let Some(acct) = accounts.get_mut(&addr) {
                    acct.sent_count += 1;
                }
            }
            for addr in recipients {
                if let Some(list) = recv_lists.get_mut(&addr) {
                    list.push(tx.id);
                }
                if let Some(acct) = accounts.get_mut(&addr) {
                    acct.recv_count += 1;
                }
            }
        }

        for (addr, set) in &utxo_sets {
            batch.put_value(keys::utxo_addr(addr), set)?;
        }
        for (addr, mut acct) in accounts {
            acct.updated_height = height;
            batch.put_value(keys::addr(&addr), &acct)?;
        }
        for (addr, list) in &sent_lists {
            batch.put_value(keys::addr_sent(addr), list)?;
        }
        for (addr, list) in &recv_lists {
            batch.put_value(keys::addr_recv(addr), list)?;
        }

        if stake_ops {
            batch.put_value(keys::CONSENSUS_STAKERS.to_vec(), &stakers)?;
            batch.put_value(keys::CONSENSUS_VALIDATORS.to_vec(), validators)?;
        }

        batch.put(
            keys::META_LATEST_HEIGHT.to_vec(),
            height.to_be_bytes().to_vec(),
        );
        batch.put(keys::META_LATEST_HASH.to_vec(), hash.as_bytes().to_vec());

        self.store.write(batch)?;
        *self.tip.write().unwrap() = Some((height, hash));
        debug!(height, %hash, txs = block.transactions.len(), "block committed");
        Ok(())
    }

    // ---- internals -------------------------------------------------------

    fn load_addr_set(&self, address: &Address) -> Result<BTreeSet<String>, LedgerError> {
        Ok(self
            .store
            .get_value(&keys::utxo_addr(address))?
            .unwrap_or_default())
    }

    fn load_tx_list(&self, key: &[u8]) -> Result<Vec<Hash>, LedgerError> {
        Ok(self.store.get_value(key)?.unwrap_or_default())
    }
}

fn decode_height(raw: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = raw.try_into().ok()?;
    Some(u64::from_be_bytes(arr))
}

impl LedgerRead for Ledger {
    fn latest_height(&self) -> u64 {
        self.tip().map(|(h, _)| h).unwrap_or(0)
    }

    fn latest_hash(&self) -> Hash {
        self.tip().map(|(_, h)| h).unwrap_or_else(Hash::zero)
    }

    fn is_empty(&self) -> bool {
        self.tip().is_none()
    }

    fn block_by_height(&self, height: u64) -> Option<Block> {
        self.get_block_by_height(height).unwrap_or_else(|err| {
            warn!(%err, height, "block read failed");
            None
        })
    }

    fn block_by_hash(&self, hash: &Hash) -> Option<Block> {
        self.get_block_by_hash(hash).unwrap_or_else(|err| {
            warn!(%err, %hash, "block read failed");
            None
        })
    }

    fn transaction(&self, id: &Hash) -> Option<Transaction> {
        self.get_transaction(id).unwrap_or_else(|err| {
            warn!(%err, %id, "transaction read failed");
            None
        })
    }
}
